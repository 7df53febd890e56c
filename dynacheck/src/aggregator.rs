//! Fan-in side of a batch
//!
//! Every unit of the [crate::Engine] reports `(slot, result)` on a shared channel. The
//! [Aggregator] counts the outstanding slots and hands back the whole batch once each slot has
//! reported, so N submitted checks always produce N results.

use std::fmt;

use log::{debug, warn};
use tokio::sync::mpsc::Receiver;

use crate::check::CheckResult;

/// A result tagged with the slot of the check that produced it
pub type Report = (usize, CheckResult);

#[derive(Debug)]
pub struct Aggregator {
    reports: Receiver<Report>,
    slots: Vec<Option<CheckResult>>,
    fallbacks: Vec<CheckResult>,
    outstanding: usize,
}

impl Aggregator {
    /// Expect one report per entry of `fallbacks`. A fallback is only used, as a failed result,
    /// when its slot never reports.
    pub fn new(reports: Receiver<Report>, fallbacks: Vec<CheckResult>) -> Self {
        Self {
            reports,
            slots: vec![None; fallbacks.len()],
            outstanding: fallbacks.len(),
            fallbacks,
        }
    }

    /// Record one report. Reports for unknown or already filled slots are dropped.
    fn accept(&mut self, (slot, result): Report) {
        match self.slots.get_mut(slot) {
            Some(entry) if entry.is_none() => {
                debug!("Slot {} reported {}", slot, result);
                *entry = Some(result);
                self.outstanding -= 1;
            }
            Some(_) => warn!("Dropping second report for slot {}", slot),
            None => warn!("Dropping report for unknown slot {}", slot),
        }
    }

    /// Drain reports until every slot has reported or every sender is gone
    pub async fn collect(mut self) -> Vec<CheckResult> {
        while self.outstanding > 0 {
            match self.reports.recv().await {
                Some(report) => self.accept(report),
                None => {
                    warn!(
                        "Result channel closed with {} checks outstanding",
                        self.outstanding
                    );
                    break;
                }
            }
        }

        self.slots
            .into_iter()
            .zip(self.fallbacks)
            .map(|(slot, fallback)| {
                slot.unwrap_or_else(|| fallback.fail("Check did not report a result"))
            })
            .collect()
    }
}

/// Counts of a finished batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl From<&[CheckResult]> for BatchSummary {
    fn from(results: &[CheckResult]) -> Self {
        results
            .iter()
            .fold(BatchSummary::default(), |mut summary, result| {
                summary.total += 1;
                if result.passed() {
                    summary.passed += 1;
                } else {
                    summary.failed += 1;
                    if result.is_timeout() {
                        summary.timed_out += 1;
                    }
                }
                summary
            })
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checks, {} passed, {} failed ({} timed out)",
            self.total, self.passed, self.failed, self.timed_out
        )
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::check::CheckConfig;

    fn template(id: &str) -> CheckResult {
        CheckResult::new(&CheckConfig::new(id, id, "g", 1.0), "test")
    }

    #[tokio::test]
    async fn collects_every_slot() {
        let (tx, rx) = mpsc::channel(4);
        let aggregator = Aggregator::new(rx, vec![template("a"), template("b"), template("c")]);

        tx.send((2, template("c").fail("down"))).await.unwrap();
        tx.send((0, template("a").pass())).await.unwrap();
        tx.send((1, template("b").pass())).await.unwrap();

        let results = aggregator.collect().await;
        let ids: Vec<_> = results.iter().map(|result| result.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!results[2].passed());
    }

    #[tokio::test]
    async fn missing_slots_are_failed() {
        let (tx, rx) = mpsc::channel(4);
        let aggregator = Aggregator::new(rx, vec![template("a"), template("b")]);

        tx.send((0, template("a").pass())).await.unwrap();
        tx.send((0, template("a").fail("late duplicate"))).await.unwrap();
        tx.send((9, template("z").pass())).await.unwrap();
        drop(tx);

        let results = aggregator.collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].passed());
        assert_eq!(results[1].id(), "b");
        assert_eq!(results[1].message(), "Check did not report a result");
    }

    #[tokio::test]
    async fn empty_batch() {
        let (_tx, rx) = mpsc::channel(1);
        assert!(Aggregator::new(rx, vec![]).collect().await.is_empty());
    }

    #[test]
    fn summary_counts() {
        let results = vec![
            template("a").pass(),
            template("b").fail("Connection refused"),
            template("c").timed_out("deadline exceeded"),
        ];
        let summary = BatchSummary::from(&results[..]);

        assert_eq!(
            summary,
            BatchSummary {
                total: 3,
                passed: 1,
                failed: 2,
                timed_out: 1
            }
        );
        assert_eq!(
            summary.to_string(),
            "3 checks, 1 passed, 2 failed (1 timed out)"
        );
    }
}
