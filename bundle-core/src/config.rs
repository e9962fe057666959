use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// Base64 encoded JSON object carrying the bundle settings.
pub const ENV_BUNDLE_CONFIG_OBJECT: &str = "BUNDLE_CONFIG_OBJECT";

const DEFAULT_MAX_BUNDLE_SIZE: u64 = 1;
const DEFAULT_MAX_BUNDLE_TIME_MILLIS: u64 = 1000;
const DEFAULT_BUNDLE_CHECK_TIMER_ID: &str = "__bundle_check_timer";
const DEFAULT_INPUT_CHANNEL_SIZE: usize = 500;

/// Size and time triggers of a bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleConfig {
    /// A bundle is closed once it holds this many elements. Anything `<= 1` makes every element
    /// its own bundle.
    pub max_bundle_size: u64,
    /// A bundle is closed once it has been open this long. Enforced approximately, see
    /// [`BundleManager`](crate::bundle::BundleManager).
    pub max_bundle_time: Duration,
    /// Identifier of the internal processing-time timer used to probe the time trigger.
    pub bundle_check_timer_id: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        BundleConfig {
            max_bundle_size: DEFAULT_MAX_BUNDLE_SIZE,
            max_bundle_time: Duration::from_millis(DEFAULT_MAX_BUNDLE_TIME_MILLIS),
            bundle_check_timer_id: DEFAULT_BUNDLE_CHECK_TIMER_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bundle: BundleConfig,
    pub input_channel_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bundle: BundleConfig::default(),
            input_channel_size: DEFAULT_INPUT_CHANNEL_SIZE,
        }
    }
}

/// Wire format of [`ENV_BUNDLE_CONFIG_OBJECT`]; every field is optional.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct BundleSpec {
    max_bundle_size: Option<u64>,
    max_bundle_time_ms: Option<u64>,
    bundle_check_timer_id: Option<String>,
    input_channel_size: Option<usize>,
}

impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(env_vars: HashMap<String, String>) -> Result<Self> {
        let mut settings = Settings::default();

        let Some(encoded) = env_vars.get(ENV_BUNDLE_CONFIG_OBJECT) else {
            info!("{ENV_BUNDLE_CONFIG_OBJECT} is not set, using default bundle settings");
            return Ok(settings);
        };

        let decoded = BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Config(format!("decoding {ENV_BUNDLE_CONFIG_OBJECT}: {e:?}")))?;
        let spec = serde_json::from_slice::<BundleSpec>(&decoded)
            .map_err(|e| Error::Config(format!("parsing {ENV_BUNDLE_CONFIG_OBJECT}: {e:?}")))?;

        if let Some(max_bundle_size) = spec.max_bundle_size {
            settings.bundle.max_bundle_size = max_bundle_size;
        }
        if let Some(max_bundle_time_ms) = spec.max_bundle_time_ms {
            settings.bundle.max_bundle_time = Duration::from_millis(max_bundle_time_ms);
        }
        if let Some(timer_id) = spec.bundle_check_timer_id {
            settings.bundle.bundle_check_timer_id = timer_id;
        }
        if let Some(input_channel_size) = spec.input_channel_size {
            settings.input_channel_size = input_channel_size;
        }

        settings.validate()?;
        Ok(settings)
    }
}

impl Settings {
    fn validate(&self) -> Result<()> {
        if self.bundle.max_bundle_size == 0 {
            return Err(Error::Config(
                "maxBundleSize should be at least 1".to_string(),
            ));
        }
        if self.bundle.bundle_check_timer_id.is_empty() {
            return Err(Error::Config(
                "bundleCheckTimerId should not be empty".to_string(),
            ));
        }
        if self.input_channel_size == 0 {
            return Err(Error::Config(
                "inputChannelSize should be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
