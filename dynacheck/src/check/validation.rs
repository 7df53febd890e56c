use std::fmt;

use super::CheckConfig;

/// What is wrong with the reported field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// The field is absent or empty
    Missing,
    /// The field is present but unusable
    Invalid(String),
}

/// Raised from [crate::Check::init] for a misconfigured check.
///
/// Only the first offending field in the probe's declared order is ever reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub id: String,
    pub check_type: String,
    pub field: String,
    pub problem: Problem,
}

impl ValidationError {
    pub fn missing<S: Into<String>>(config: &CheckConfig, check_type: &str, field: S) -> Self {
        Self {
            id: config.id.clone(),
            check_type: check_type.to_string(),
            field: field.into(),
            problem: Problem::Missing,
        }
    }

    pub fn invalid<S: Into<String>, R: Into<String>>(
        config: &CheckConfig,
        check_type: &str,
        field: S,
        reason: R,
    ) -> Self {
        Self {
            id: config.id.clone(),
            check_type: check_type.to_string(),
            field: field.into(),
            problem: Problem::Invalid(reason.into()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            Problem::Missing => write!(
                f,
                "{} check {} is missing required field {}",
                self.check_type, self.id, self.field
            ),
            Problem::Invalid(reason) => write!(
                f,
                "{} check {} has invalid field {} : {}",
                self.check_type, self.id, self.field, reason
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Name the first empty field, walking `fields` in the order given
pub fn first_missing<'a>(fields: &[(&'a str, &str)]) -> Option<&'a str> {
    fields
        .iter()
        .find(|(_, value)| value.is_empty())
        .map(|(field, _)| *field)
}

/// Fail with the first empty mandatory field
pub fn require_fields(
    config: &CheckConfig,
    check_type: &str,
    fields: &[(&str, &str)],
) -> Result<(), ValidationError> {
    match first_missing(fields) {
        Some(field) => Err(ValidationError::missing(config, check_type, field)),
        None => Ok(()),
    }
}

/// Port zero cannot be dialled
pub fn require_port(config: &CheckConfig, check_type: &str, port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::invalid(
            config,
            check_type,
            "Port",
            "port must be between 1 and 65535",
        ));
    }
    Ok(())
}
