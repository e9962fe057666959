//! Collects the result handles produced while processing the element(s) of the current bundle
//! and seals them into one aggregate handle.

use parking_lot::Mutex;

use crate::output::{self, OutputFuture};
use crate::{Error, Result};

/// Future Collector contract the [`BundleManager`](crate::bundle::BundleManager) relies on.
pub trait FutureCollector<T>: Send + Sync {
    /// Starts a fresh tracking slot. Safe to call even if the previous slot was never sealed.
    fn prepare(&self);

    /// Registers an output of the element being processed.
    fn add(&self, output: OutputFuture<T>) -> Result<()>;

    /// Registers several outputs of the element being processed.
    fn add_all(&self, outputs: Vec<OutputFuture<T>>) -> Result<()> {
        for output in outputs {
            self.add(output)?;
        }
        Ok(())
    }

    /// Seals the slot and returns a handle resolving once everything registered since the last
    /// [`prepare`](FutureCollector::prepare) resolved. Must not block.
    fn finish(&self) -> OutputFuture<T>;

    /// Seals the slot and drops everything registered in it.
    fn discard(&self);
}

/// `None` means the collector is sealed.
pub struct OutputFutureCollector<T> {
    slot: Mutex<Option<Vec<OutputFuture<T>>>>,
}

impl<T> Default for OutputFutureCollector<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> OutputFutureCollector<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> FutureCollector<T> for OutputFutureCollector<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn prepare(&self) {
        *self.slot.lock() = Some(Vec::new());
    }

    fn add(&self, output: OutputFuture<T>) -> Result<()> {
        let mut slot = self.slot.lock();
        let Some(outputs) = slot.as_mut() else {
            return Err(Error::Collector(
                "cannot add output to a sealed collector, prepare() must be invoked first"
                    .to_string(),
            ));
        };
        outputs.push(output);
        Ok(())
    }

    fn finish(&self) -> OutputFuture<T> {
        let outputs = self.slot.lock().take().unwrap_or_default();
        output::flatten(outputs)
    }

    fn discard(&self) {
        self.slot.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    #[test]
    fn test_add_requires_prepare() {
        let collector = OutputFutureCollector::<u32>::new();
        let result = collector.add(output::ready(vec![1]));
        assert!(matches!(result, Err(Error::Collector(_))));
    }

    #[test]
    fn test_finish_without_outputs_is_resolved() {
        let collector = OutputFutureCollector::<u32>::new();
        collector.prepare();
        let outputs = collector.finish().now_or_never().unwrap().unwrap();
        assert!(outputs.is_empty());

        // sealed after finish
        assert!(collector.add(output::ready(vec![1])).is_err());
    }

    #[tokio::test]
    async fn test_finish_waits_for_all_outputs() {
        let collector = OutputFutureCollector::<u32>::new();
        collector.prepare();

        let (tx, rx) = oneshot::channel::<Vec<u32>>();
        collector.add(output::ready(vec![1])).unwrap();
        collector
            .add_all(vec![
                output::from_future(async move {
                    rx.await.map_err(|e| Error::Process(e.to_string()))
                }),
                output::ready(vec![3]),
            ])
            .unwrap();

        let sealed = collector.finish();
        assert!(sealed.clone().now_or_never().is_none());

        tx.send(vec![2]).unwrap();
        let outputs = timeout(Duration::from_secs(1), sealed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*outputs, vec![1, 2, 3]);
    }

    #[test]
    fn test_prepare_drops_unsealed_slot() {
        let collector = OutputFutureCollector::<u32>::new();
        collector.prepare();
        collector.add(output::ready(vec![1])).unwrap();
        collector.prepare();
        collector.add(output::ready(vec![2])).unwrap();

        let outputs = collector.finish().now_or_never().unwrap().unwrap();
        assert_eq!(*outputs, vec![2]);
    }

    #[test]
    fn test_discard_seals() {
        let collector = OutputFutureCollector::<u32>::new();
        collector.prepare();
        collector.add(output::ready(vec![1])).unwrap();
        collector.discard();
        assert!(collector.add(output::ready(vec![2])).is_err());
        let outputs = collector.finish().now_or_never().unwrap().unwrap();
        assert!(outputs.is_empty());
    }
}
