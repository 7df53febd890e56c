//! describe errors in dynacheck

use thiserror::Error;

use crate::check::ValidationError;

/// Error type for configuration-time failures.
///
/// Only admission of a check can fail. Once a check has been admitted every problem it meets
/// while running is reported inside its [crate::CheckResult].
#[derive(Error, Debug)]
pub enum CheckError {
    /// A mandatory field is missing or a field holds an unusable value
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The definition blob could not be parsed into the probe's fields
    #[error("Parsing definition of {check_type} check {id} failed : {source}")]
    Definition {
        id: String,
        check_type: String,
        #[source]
        source: serde_json::Error,
    },
    /// The registry has no constructor for the requested type
    #[error("Unknown check type `{0}`")]
    UnknownCheckType(String),
    /// A constructor was registered twice under the same type name
    #[error("Check type `{0}` is already registered")]
    DuplicateCheckType(String),
    /// Two definitions share the same check id
    #[error("Check id `{0}` is used by more than one definition")]
    DuplicateCheckId(String),
}
