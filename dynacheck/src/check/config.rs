use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};

/// Identity and scoring metadata attached to every check instance.
///
/// The score weight is carried through to every result but never interpreted here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
pub struct CheckConfig {
    /// Globally unique id of the check
    pub id: String,
    /// Human readable label
    pub name: String,
    /// Logical group used for reporting (eg a team or host)
    pub group: String,
    /// Weight handed to downstream scoring
    pub score_weight: f64,
}

impl CheckConfig {
    pub fn new<S: Into<String>>(id: S, name: S, group: S, score_weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            group: group.into(),
            score_weight,
        }
    }
}

fn default_score_weight() -> f64 {
    1.0
}

/// Declarative record used to admit one check through the [crate::Registry].
///
/// ```yaml
/// id: team1-mail
/// name: Team 1 mail
/// group: team1
/// type: imap
/// timeout: 10
/// definition:
///   Host: 10.0.1.25
///   Username: scorer
///   Password: hunter2
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CheckDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default = "default_score_weight")]
    pub score_weight: f64,
    /// Registry name of the probe to build
    #[serde(rename = "type")]
    pub check_type: String,
    /// Shortens the engine timeout for this check only
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub timeout: Option<Duration>,
    /// Probe specific fields, handed over untouched as JSON
    #[serde(default)]
    pub definition: serde_json::Value,
}

impl CheckDefinition {
    /// The identity part of the definition
    pub fn config(&self) -> CheckConfig {
        CheckConfig {
            id: self.id.clone(),
            name: self.name.clone(),
            group: self.group.clone(),
            score_weight: self.score_weight,
        }
    }

    /// Serialise the probe specific part so it can be passed to [crate::Check::init].
    /// An absent definition is treated as an empty object.
    pub fn raw_definition(&self) -> Result<Vec<u8>, serde_json::Error> {
        match &self.definition {
            serde_json::Value::Null => Ok(b"{}".to_vec()),
            value => serde_json::to_vec(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = CheckConfigBuilder::default()
            .id("web-1")
            .name("Web")
            .build()
            .unwrap();

        assert_eq!(config.id, "web-1");
        assert_eq!(config.group, "");
        assert_eq!(config.score_weight, 0.0);
    }

    #[test]
    fn definition_from_json() {
        let definition: CheckDefinition = serde_json::from_str(
            r#"{
                "id": "team1-winrm",
                "name": "Team 1 WinRM",
                "type": "winrm",
                "timeout": 2.5,
                "definition": {"Host": "10.0.1.5", "Cmd": "hostname"}
            }"#,
        )
        .unwrap();

        assert_eq!(definition.check_type, "winrm");
        assert_eq!(definition.score_weight, 1.0);
        assert_eq!(definition.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(
            definition.config(),
            CheckConfig::new("team1-winrm", "Team 1 WinRM", "", 1.0)
        );
    }

    #[test]
    fn missing_definition_is_empty_object() {
        let definition: CheckDefinition =
            serde_json::from_str(r#"{"id": "a", "name": "b", "type": "tcp"}"#).unwrap();

        assert_eq!(definition.timeout, None);
        assert_eq!(definition.raw_definition().unwrap(), b"{}".to_vec());
    }
}
