//! Pluggable service checks run concurrently under per-check deadlines.
//!
//! A [Registry] turns declarative [CheckDefinition]s into initialised checks, the [Engine] runs
//! a batch of them with one task per check, and the results are gathered by the [Aggregator]
//! into exactly one [CheckResult] per submitted check.
//!
//! ```no_run
//! use dynacheck::{CheckDefinition, Engine, EngineConfig, Registry};
//!
//! # async fn demo(definitions: Vec<CheckDefinition>) -> Result<(), dynacheck::CheckError> {
//! let checks = Registry::builtin().load_all(&definitions)?;
//! let results = Engine::new(EngineConfig::default()).run_batch(&checks).await;
//! for result in results {
//!     println!("{}", result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod check;
pub mod engine;
pub mod error;
/// This module contains the built-in probes
pub mod probe;
pub mod registry;

pub use aggregator::{Aggregator, BatchSummary};
pub use check::{
    Check, CheckConfig, CheckConfigBuilder, CheckDefinition, CheckResult, RunContext,
    ScheduledCheck, Stage, StageError, ValidationError, TIMEOUT_MESSAGE,
};
pub use engine::{Engine, EngineConfig, EngineConfigBuilder};
pub use error::CheckError;
pub use registry::{Admission, Constructor, Registry};

/// Name of the Crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Version of the Crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
