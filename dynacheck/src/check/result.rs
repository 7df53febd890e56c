use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CheckConfig;

/// Leading text of every message reporting an elapsed deadline or a cancelled run
pub const TIMEOUT_MESSAGE: &str = "Timeout limit reached";

/// Outcome of exactly one run of a check.
///
/// The identity of the check is copied in by value so a result stays valid after the check that
/// produced it has been reconfigured or dropped. A result starts out failed with an empty message
/// and is finished with either [CheckResult::pass] or [CheckResult::fail], which keeps
/// `passed == message.is_empty()` true for every finished result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    timestamp: DateTime<Utc>,
    id: String,
    name: String,
    group: String,
    score_weight: f64,
    check_type: String,
    passed: bool,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<HashMap<String, String>>,
}

impl CheckResult {
    /// Create the template result for a run starting now
    pub fn new<S: Into<String>>(config: &CheckConfig, check_type: S) -> Self {
        Self {
            timestamp: Utc::now(),
            id: config.id.clone(),
            name: config.name.clone(),
            group: config.group.clone(),
            score_weight: config.score_weight,
            check_type: check_type.into(),
            passed: false,
            message: String::new(),
            details: None,
        }
    }

    /// Mark the check as passed
    pub fn pass(mut self) -> Self {
        self.passed = true;
        self.message.clear();
        self
    }

    /// Mark the check as failed with an explanation
    pub fn fail<S: Into<String>>(mut self, message: S) -> Self {
        let message = message.into();
        self.passed = false;
        self.message = if message.is_empty() {
            "Check failed without reporting a reason".to_string()
        } else {
            message
        };
        self
    }

    /// Mark the check as failed because its deadline elapsed
    pub fn timed_out<S: AsRef<str>>(self, detail: S) -> Self {
        let message = format!("{} : {}", TIMEOUT_MESSAGE, detail.as_ref());
        self.fail(message)
    }

    /// Attach a structured diagnostic
    pub fn with_detail<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.to_string());
        self
    }

    /// When the run started
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn score_weight(&self) -> f64 {
        self.score_weight
    }

    pub fn check_type(&self) -> &str {
        &self.check_type
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&HashMap<String, String>> {
        self.details.as_ref()
    }

    /// True when the failure was caused by a deadline or cancellation
    pub fn is_timeout(&self) -> bool {
        !self.passed && self.message.contains(TIMEOUT_MESSAGE)
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            write!(f, "{}/{}/passed", self.id, self.check_type)
        } else {
            write!(f, "{}/{}/failed: {}", self.id, self.check_type, self.message)
        }
    }
}
