//! The [Check] trait is the contract every probe implements so the [crate::Engine] can run an
//! arbitrary mix of protocols uniformly.
//!
//! Lifecycle of a check:
//! 1. built empty by the [crate::Registry] from its type name
//! 2. configured once with [Check::init], which parses and validates without touching the network
//! 3. run any number of times with [Check::run], each run producing exactly one [CheckResult]
//!
//! A configured check holds no run to run state so [Check::run] takes `&self` and the same check
//! can be shared behind an [Arc] by successive batches.
pub mod config;
pub mod context;
pub mod result;
pub mod validation;

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::CheckError;

pub use config::{CheckConfig, CheckConfigBuilder, CheckDefinition};
pub use context::{RunContext, Stage, StageError};
pub use result::{CheckResult, TIMEOUT_MESSAGE};
pub use validation::{require_fields, require_port, Problem, ValidationError};

#[async_trait]
pub trait Check: Debug + Send + Sync {
    /// Static type tag copied into results and validation errors
    fn check_type(&self) -> &'static str;

    /// Parse `definition` into the probe's fields with its documented defaults, store `config`
    /// and validate. The check is left untouched when this fails.
    fn init(&mut self, config: CheckConfig, definition: &[u8]) -> Result<(), CheckError>;

    /// Execute the check once. Never fails: every problem is reported in the returned result.
    async fn run(&self, ctx: RunContext, result: CheckResult) -> CheckResult;

    /// The configuration this check was initialised with
    fn config(&self) -> CheckConfig;
}

/// Parse the JSON definition of a probe.
///
/// Fields absent from the JSON keep the value from `T::default()` so probes declare their
/// defaults with `#[serde(default)]` and a [Default] impl.
pub fn parse_definition<T: DeserializeOwned>(
    config: &CheckConfig,
    check_type: &str,
    definition: &[u8],
) -> Result<T, CheckError> {
    serde_json::from_slice(definition).map_err(|source| CheckError::Definition {
        id: config.id.clone(),
        check_type: check_type.to_string(),
        source,
    })
}

/// An initialised check admitted to run, with its optional timeout override
#[derive(Debug, Clone)]
pub struct ScheduledCheck {
    check: Arc<dyn Check>,
    timeout: Option<Duration>,
}

impl ScheduledCheck {
    pub fn new(check: Box<dyn Check>) -> Self {
        Self {
            check: Arc::from(check),
            timeout: None,
        }
    }

    /// Shorten the engine timeout for this check. An override longer than the engine timeout
    /// has no effect.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn check(&self) -> &Arc<dyn Check> {
        &self.check
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn id(&self) -> String {
        self.check.config().id
    }

    /// A not yet started result for this check, stamped with the current time
    pub fn template(&self) -> CheckResult {
        CheckResult::new(&self.check.config(), self.check.check_type())
    }
}

impl From<Box<dyn Check>> for ScheduledCheck {
    fn from(check: Box<dyn Check>) -> Self {
        ScheduledCheck::new(check)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default)]
    struct AlwaysPass {
        config: CheckConfig,
    }

    #[async_trait]
    impl Check for AlwaysPass {
        fn check_type(&self) -> &'static str {
            "always"
        }

        fn init(&mut self, config: CheckConfig, _definition: &[u8]) -> Result<(), CheckError> {
            self.config = config;
            Ok(())
        }

        async fn run(&self, _ctx: RunContext, result: CheckResult) -> CheckResult {
            result.pass()
        }

        fn config(&self) -> CheckConfig {
            self.config.clone()
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(default, rename_all = "PascalCase")]
    struct Sample {
        host: String,
        port: u16,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                host: String::new(),
                port: 143,
            }
        }
    }

    #[test]
    fn parse_keeps_defaults_for_absent_fields() {
        let config = CheckConfig::new("a", "A", "g", 1.0);
        let sample: Sample = parse_definition(&config, "sample", br#"{"Host": "mail"}"#).unwrap();

        assert_eq!(sample.host, "mail");
        assert_eq!(sample.port, 143);
    }

    #[test]
    fn parse_failure_names_check() {
        let config = CheckConfig::new("a", "A", "g", 1.0);
        let err = parse_definition::<Sample>(&config, "sample", b"{not json").unwrap_err();

        assert!(matches!(err, CheckError::Definition { ref id, .. } if id == "a"));
    }

    #[tokio::test]
    async fn scheduled_check_template() {
        let mut check = AlwaysPass::default();
        check
            .init(CheckConfig::new("id-1", "One", "g", 3.0), b"{}")
            .unwrap();

        let scheduled = ScheduledCheck::from(Box::new(check) as Box<dyn Check>)
            .with_timeout(Some(Duration::from_secs(3)));
        assert_eq!(scheduled.id(), "id-1");
        assert_eq!(scheduled.timeout(), Some(Duration::from_secs(3)));

        let result = scheduled
            .check()
            .run(RunContext::with_timeout(Duration::from_secs(1)), scheduled.template())
            .await;
        assert!(result.passed());
        assert_eq!(result.check_type(), "always");
        assert_eq!(result.score_weight(), 3.0);
    }
}
