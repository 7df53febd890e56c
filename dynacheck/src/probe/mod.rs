//! Built-in probes.
//!
//! Each probe is a typed definition record embedding a [CheckConfig] and implementing
//! [crate::Check]. The record derives `Deserialize` with `#[serde(default)]` over a hand written
//! [Default], so documented defaults are in place before the JSON definition is applied.

use regex::Regex;

use crate::check::{CheckConfig, ValidationError};

/// This module contains the http probe
pub mod http;
/// This module contains the imap probe
pub mod imap;
/// This module contains the tcp probe
pub mod tcp;
/// This module contains the winrm probe
pub mod winrm;

/// Compile the content pattern of a probe, only when content matching is turned on
pub(crate) fn content_matcher(
    config: &CheckConfig,
    check_type: &str,
    match_content: bool,
    pattern: &str,
) -> Result<Option<Regex>, ValidationError> {
    if !match_content {
        return Ok(None);
    }
    Regex::new(pattern).map(Some).map_err(|err| {
        ValidationError::invalid(config, check_type, "ContentRegex", err.to_string())
    })
}
