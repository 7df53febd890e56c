use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};

#[serde_as]
#[derive(Debug, Deserialize, Serialize, Builder, Clone, PartialEq)]
#[serde(default)]
#[builder(default)]
pub struct EngineConfig {
    /// Deadline for each check of a batch, measured from the start of the batch
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub timeout: Duration,
    /// How long a check may keep running after its deadline to release its resources before
    /// it is aborted
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub grace: Duration,
    /// Maximum number of checks running at the same time
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            grace: Duration::from_secs(5),
            max_concurrency: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrency, 64);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfigBuilder::default()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.grace, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_deserialise() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"timeout": 1.5, "max_concurrency": 4}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.grace, Duration::from_secs(5));
        assert_eq!(config.max_concurrency, 4);
    }
}
