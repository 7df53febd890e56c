//! Concurrent execution of a batch of checks
//!
//! Each check of a batch runs as its own tokio task (a unit) holding a child of the batch
//! [CancellationToken] and its own deadline, never later than the batch deadline. Units wait
//! for a slot of a bounded pool, run the check, and always report exactly one result to the
//! [Aggregator]. A unit that reaches its deadline cancels its check, gives it the configured
//! grace period to release its resources, and aborts it when it does not stop.

pub mod config;

use std::{any::Any, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinError,
    time::{sleep_until, timeout, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregator::{Aggregator, BatchSummary, Report},
    check::{Check, CheckResult, RunContext, ScheduledCheck},
};

pub use config::{EngineConfig, EngineConfigBuilder};

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every check once and return one result per check, in submission order
    pub async fn run_batch(&self, checks: &[ScheduledCheck]) -> Vec<CheckResult> {
        self.run_batch_with_cancel(checks, &CancellationToken::new())
            .await
    }

    /// As [Engine::run_batch], with a token that cuts the whole batch short when cancelled.
    /// Checks interrupted that way are reported as timed out.
    pub async fn run_batch_with_cancel(
        &self,
        checks: &[ScheduledCheck],
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        let started = Instant::now();
        let batch = RunContext::new(cancel.child_token(), started + self.config.timeout);
        // Finishing the batch, or dropping this future, cancels every unit still running
        let _cancel_units = batch.token().clone().drop_guard();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let (reports, receiver) = mpsc::channel::<Report>(checks.len().max(1));
        let aggregator = Aggregator::new(
            receiver,
            checks.iter().map(ScheduledCheck::template).collect(),
        );

        info!("Starting batch of {} checks", checks.len());

        for (slot, scheduled) in checks.iter().enumerate() {
            let unit = Unit {
                slot,
                check: scheduled.check().clone(),
                ctx: batch.child(scheduled.timeout()),
                grace: self.config.grace,
                permits: permits.clone(),
            };
            let reports = reports.clone();

            tokio::spawn(async move {
                let report = unit.run().await;
                if reports.send(report).await.is_err() {
                    warn!("Batch finished before slot {} reported", slot);
                }
            });
        }
        drop(reports);

        let results = aggregator.collect().await;

        info!(
            "Batch completed in {:?}: {}",
            started.elapsed(),
            BatchSummary::from(&results[..])
        );
        results
    }
}

/// One check of a batch together with everything it needs to run on its own task
struct Unit {
    slot: usize,
    check: Arc<dyn Check>,
    ctx: RunContext,
    grace: Duration,
    permits: Arc<Semaphore>,
}

impl Unit {
    async fn run(self) -> Report {
        let Unit {
            slot,
            check,
            ctx,
            grace,
            permits,
        } = self;
        let id = check.config().id;

        // Waiting for the pool counts against the deadline of the check
        let _permit = tokio::select! {
            permit = permits.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let result = blank_result(&*check).fail("Execution pool closed before the check started");
                    return (slot, result);
                }
            },
            _ = ctx.token().cancelled() => {
                return (slot, blank_result(&*check).timed_out("cancelled before the check started"));
            },
            _ = sleep_until(ctx.deadline()) => {
                return (slot, blank_result(&*check).timed_out("deadline exceeded before the check started"));
            },
        };

        let template = blank_result(&*check);
        let mut task = tokio::spawn({
            let check = check.clone();
            let ctx = ctx.clone();
            let template = template.clone();
            async move { check.run(ctx, template).await }
        });

        tokio::select! {
            joined = &mut task => return (slot, settle(joined, template)),
            _ = sleep_until(ctx.deadline()) => debug!("Check {} reached its deadline", id),
            _ = ctx.token().cancelled() => debug!("Check {} was cancelled", id),
        }

        ctx.cancel();

        let result = match timeout(grace, &mut task).await {
            Ok(joined) => settle(joined, template.clone()),
            Err(_) => {
                warn!(
                    "Check {} ignored cancellation for {:?}, aborting it",
                    id, grace
                );
                task.abort();
                // The aborted future, and every socket it holds, is dropped before we report
                let _ = timeout(grace, task).await;
                let result = template.timed_out(format!(
                    "check did not stop within {:?} of its deadline",
                    grace
                ));
                return (slot, result);
            }
        };

        let result = if result.is_timeout() {
            result
        } else if result.passed() {
            template.timed_out("deadline exceeded before the check reported")
        } else {
            let message = result.message().to_string();
            result.timed_out(message)
        };
        (slot, result)
    }
}

fn blank_result(check: &dyn Check) -> CheckResult {
    CheckResult::new(&check.config(), check.check_type())
}

/// Turn the outcome of a check task into its result
fn settle(joined: Result<CheckResult, JoinError>, template: CheckResult) -> CheckResult {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let reason = panic_reason(err.into_panic());
            warn!("Check {} panicked: {}", template.id(), reason);
            template.fail(format!("Check panicked : {}", reason))
        }
        Err(err) => template.fail(format!("Check was aborted : {}", err)),
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason.to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "unknown panic".to_string()
    }
}
