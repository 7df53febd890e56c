//! Cancellation context handed to every run of a check
//!
//! A [RunContext] couples the [CancellationToken] of the batch with the absolute deadline of the
//! run. Every suspension point of a probe (dial, handshake, command) goes through
//! [RunContext::bound] so that the batch deadline, the protocol's own shorter sub timeout and
//! the cancellation signal are all observed at the point where the probe is waiting.

use std::{fmt, future::Future, time::Duration};

use thiserror::Error;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use super::TIMEOUT_MESSAGE;

/// Stages every probe walks through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connecting,
    Authenticating,
    Executing,
    Closing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::Connecting => "connecting",
            Stage::Authenticating => "authenticating",
            Stage::Executing => "executing",
            Stage::Closing => "closing",
        };
        write!(f, "{}", stage)
    }
}

/// Why a bounded stage did not complete
#[derive(Error, Debug)]
pub enum StageError<E> {
    /// The run deadline or the stage sub timeout elapsed
    #[error("{} while {0} : deadline exceeded", TIMEOUT_MESSAGE)]
    Timeout(Stage),
    /// The context was cancelled
    #[error("{} while {0} : context cancelled", TIMEOUT_MESSAGE)]
    Cancelled(Stage),
    /// The stage itself failed
    #[error("{0}")]
    Failed(E),
}

impl<E> StageError<E> {
    /// True for deadline and cancellation failures
    pub fn is_timeout(&self) -> bool {
        !matches!(self, StageError::Failed(_))
    }
}

/// Cancellation token plus absolute deadline for one run
#[derive(Debug, Clone)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Instant,
}

impl RunContext {
    pub fn new(token: CancellationToken, deadline: Instant) -> Self {
        Self { token, deadline }
    }

    /// A fresh context expiring `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), Instant::now() + timeout)
    }

    /// Derive a context that is cancelled with this one and never outlives it. `timeout` counts
    /// from now.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match timeout {
            Some(timeout) => self.deadline.min(Instant::now() + timeout),
            None => self.deadline,
        };
        Self::new(self.token.child_token(), deadline)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// Run one suspension point of `stage`.
    ///
    /// The future is given `sub_timeout` or whatever is left of the run deadline, whichever is
    /// shorter, and is dropped as soon as the context is cancelled.
    pub async fn bound<F, T, E>(
        &self,
        stage: Stage,
        sub_timeout: Duration,
        future: F,
    ) -> Result<T, StageError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if self.token.is_cancelled() {
            return Err(StageError::Cancelled(stage));
        }

        let deadline = self.deadline.min(Instant::now() + sub_timeout);

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StageError::Cancelled(stage)),
            outcome = timeout_at(deadline, future) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(StageError::Failed(err)),
                Err(_) => Err(StageError::Timeout(stage)),
            },
        }
    }

    /// Run a release step of the closing stage.
    ///
    /// Release ignores cancellation and the run deadline so resources acquired before the
    /// deadline are still handed back. It is bounded only by `limit`.
    pub async fn release<F, T, E>(&self, limit: Duration, future: F) -> Result<T, StageError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        match timeout(limit, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StageError::Failed(err)),
            Err(_) => Err(StageError::Timeout(Stage::Closing)),
        }
    }
}
