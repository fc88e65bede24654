//! Run-once-until-success execution guard
//!
//! [`IdempotentGuard`] wraps a side-effecting action so that, across any
//! number of (possibly concurrent) callers:
//!
//! - the action never runs concurrently with itself,
//! - once it succeeds it is never invoked again,
//! - a failure leaves the guard open so a later call can retry.
//!
//! The action runs *inside* the critical section. An atomic flag alone would
//! only dedupe the flag update, not the call.
//!
//! Callers that were already waiting on the lock while an attempt failed
//! receive that attempt's error instead of immediately re-running the action.
//! Only callers arriving after the failure start a new attempt.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Successful result of [`IdempotentGuard::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// The action ran during this call and succeeded
    Executed,
    /// The action had already succeeded; it was not invoked
    AlreadyDone,
}

#[derive(Debug)]
struct GuardState<E> {
    done: bool,
    attempts: u64,
    last_error: Option<E>,
}

/// Runs an async action until it succeeds once, then never again
pub struct IdempotentGuard<E> {
    label: &'static str,
    state: Mutex<GuardState<E>>,
    // Number of attempts that have finished; read before queueing on the lock.
    settled: AtomicU64,
    done: AtomicBool,
}

impl<E> IdempotentGuard<E>
where
    E: Clone + fmt::Display,
{
    /// Create an open guard. `label` only appears in log events.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            state: Mutex::new(GuardState {
                done: false,
                attempts: 0,
                last_error: None,
            }),
            settled: AtomicU64::new(0),
            done: AtomicBool::new(false),
        }
    }

    /// Label used in log events
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Whether the wrapped action has succeeded
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Number of times the action has been started
    pub async fn attempts(&self) -> u64 {
        self.state.lock().await.attempts
    }

    /// Run `action` unless it already succeeded.
    ///
    /// Errors from the action are returned unchanged. The guard never retries
    /// on its own; call `run` again to retry.
    pub async fn run<F, Fut>(&self, action: F) -> Result<GuardOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let ticket = self.settled.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        if state.done {
            debug!(guard = self.label, "Guard already done, skipping action");
            return Ok(GuardOutcome::AlreadyDone);
        }

        // An attempt finished while we were queued and it failed: share its result.
        if state.attempts > ticket {
            if let Some(error) = &state.last_error {
                debug!(
                    guard = self.label,
                    attempt = state.attempts,
                    error = %error,
                    "Returning failure of the attempt this caller waited on"
                );
                return Err(error.clone());
            }
        }

        state.attempts += 1;
        state.last_error = None;
        let attempt = state.attempts;

        let result = action().await;
        self.settled.store(attempt, Ordering::Release);

        match result {
            Ok(()) => {
                state.done = true;
                self.done.store(true, Ordering::Release);
                debug!(guard = self.label, attempt, "Guarded action succeeded");
                Ok(GuardOutcome::Executed)
            }
            Err(error) => {
                warn!(guard = self.label, attempt, error = %error, "Guarded action failed");
                state.last_error = Some(error.clone());
                Err(error)
            }
        }
    }
}

impl<E> fmt::Debug for IdempotentGuard<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotentGuard")
            .field("label", &self.label)
            .field("done", &self.done.load(Ordering::Acquire))
            .field("settled", &self.settled.load(Ordering::Acquire))
            .finish()
    }
}
