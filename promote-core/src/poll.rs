//! Bounded polling and cooperative abort.
//!
//! Every suspension point in a release is a [`Poller`] loop: fixed interval,
//! explicit attempt ceiling, abort checked before each attempt and raced
//! against each sleep. Callers turn an exhausted poller into
//! [`PollOutcome::TimedOut`]; nothing waits forever.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::PromoteError;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Fixed-interval poll budget. Worst-case wait is
/// `interval * (max_attempts - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval_secs: u64, max_attempts: u32) -> Self {
        Self {
            interval_secs,
            max_attempts,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        self.interval() * self.max_attempts.saturating_sub(1)
    }
}

/// Tagged result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T, L> {
    Converged(T),
    /// Ceiling reached. `last` is the final non-converged observation, if any
    /// attempt produced one.
    TimedOut { attempts: u32, last: Option<L> },
}

// ---------------------------------------------------------------------------
// Abort
// ---------------------------------------------------------------------------

/// Trigger side of an abort request.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side of an abort request, handed to every polling component.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
    // Keeps the channel open even if every handle is dropped.
    _tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    /// A signal that can never fire.
    pub fn never() -> Self {
        abort_pair().1
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort has been requested.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected handle/signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);
    (
        AbortHandle { tx: tx.clone() },
        AbortSignal { rx, _tx: tx },
    )
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Attempt counter for one bounded wait.
///
/// ```rust,ignore
/// let mut poller = Poller::new(policy, abort.clone(), "rollout");
/// while let Some(attempt) = poller.next_attempt().await? {
///     // observe; return on convergence
/// }
/// // budget exhausted
/// ```
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    abort: AbortSignal,
    step: String,
    attempts: u32,
}

impl Poller {
    pub fn new(policy: PollPolicy, abort: AbortSignal, step: impl Into<String>) -> Self {
        Self {
            policy,
            abort,
            step: step.into(),
            attempts: 0,
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait for the next attempt slot.
    ///
    /// Returns `Ok(None)` once the ceiling is reached and
    /// `Err(PromoteError::Aborted)` if abort fires before or during the wait.
    pub async fn next_attempt(&mut self) -> Result<Option<u32>, PromoteError> {
        if self.attempts >= self.policy.max_attempts {
            return Ok(None);
        }
        if self.attempts > 0 {
            let interval = self.policy.interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.abort.aborted() => {}
            }
        }
        if self.abort.is_aborted() {
            return Err(PromoteError::Aborted {
                step: self.step.clone(),
            });
        }
        self.attempts += 1;
        tracing::debug!(
            step = %self.step,
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            "poll attempt"
        );
        Ok(Some(self.attempts))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
