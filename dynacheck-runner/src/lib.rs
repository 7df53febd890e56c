use std::io::Write;

use dynacheck::{Admission, BatchSummary, CheckResult, Engine, Registry};
use log::error;
use tokio_util::sync::CancellationToken;

use config::Config;
use error::RunnerError;

pub mod config;
pub mod error;
pub mod tokio_tools;

/// Name of the Crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Version of the Crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialise every configured check without touching the network
pub fn validate(config: &Config) -> Admission {
    Registry::builtin().admit(&config.checks)
}

/// Run every configured check once. Nothing runs when any definition is rejected.
pub async fn run_once(
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Vec<CheckResult>, RunnerError> {
    let admission = validate(config);
    if !admission.rejected.is_empty() {
        for err in &admission.rejected {
            error!("{}", err);
        }
        return Err(RunnerError::Rejected(admission.rejected.len()));
    }

    let engine = Engine::new(config.engine.clone());
    Ok(engine
        .run_batch_with_cancel(&admission.checks, cancel)
        .await)
}

/// Print results as a JSON array, or one line each followed by a summary
pub fn write_results<W: Write>(
    mut out: W,
    results: &[CheckResult],
    json: bool,
) -> Result<(), RunnerError> {
    if json {
        serde_json::to_writer_pretty(&mut out, results)?;
        writeln!(out)?;
        return Ok(());
    }

    for result in results {
        writeln!(out, "{}", result)?;
    }
    writeln!(out, "{}", BatchSummary::from(results))?;
    Ok(())
}
