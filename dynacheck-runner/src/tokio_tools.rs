//! Module to handle easy sending functions to tokio
//!
//! run_in_tokio builds a runtime and blocks on the given future. cancel_on_ctrl_c hands back a
//! CancellationToken that is cancelled when the process is interrupted, so a running batch can
//! report its unfinished checks as timed out instead of being killed.

use futures::Future;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::RunnerError;

/// run async function inside a multi threaded tokio instance
pub fn run_in_tokio<F, T>(my_function: F) -> F::Output
where
    F: Future<Output = Result<T, RunnerError>>,
{
    info!("starting Tokio");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(my_function)
}

/// Token cancelled on the first ctrl-c. Must be called from inside the runtime.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => {
                        warn!("Interrupted, cancelling running checks");
                        trigger.cancel();
                    }
                    Err(err) => warn!("Listening for ctrl-c failed : {}", err),
                }
            }
            _ = trigger.cancelled() => {}
        }
    });

    cancel
}
