//! Event-time progress marker carried through the operator.

use std::fmt;

use chrono::{DateTime, Utc};

/// Watermark asserts that no element older than it will arrive. Watermarks are monotonically
/// non-decreasing on a single input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Lowest possible watermark, nothing has been asserted yet.
    pub const MIN: Watermark = Watermark(DateTime::<Utc>::MIN_UTC);

    /// Maximum representable timestamp. Bounded inputs emit it once they are exhausted, which
    /// forces any open bundle to be closed.
    pub const END_OF_STREAM: Watermark = Watermark(DateTime::<Utc>::MAX_UTC);

    /// Returns `None` if the millis are out of the representable range.
    pub fn from_timestamp_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Watermark)
    }

    pub fn now() -> Self {
        Watermark(Utc::now())
    }

    pub fn is_end_of_stream(&self) -> bool {
        *self == Self::END_OF_STREAM
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(time: DateTime<Utc>) -> Self {
        Watermark(time)
    }
}

impl From<Watermark> for DateTime<Utc> {
    fn from(watermark: Watermark) -> Self {
        watermark.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end_of_stream() {
            write!(f, "END_OF_STREAM")
        } else {
            write!(f, "{}", self.0.to_rfc3339())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_stream_is_the_largest_watermark() {
        let wm = Watermark::from_timestamp_millis(1_700_000_000_000).unwrap();
        assert!(wm < Watermark::END_OF_STREAM);
        assert!(Watermark::MIN < wm);
        assert!(Watermark::END_OF_STREAM.is_end_of_stream());
        assert!(!wm.is_end_of_stream());
        assert_eq!(Watermark::END_OF_STREAM.to_string(), "END_OF_STREAM");
    }
}
