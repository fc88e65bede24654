//! Branch transaction state machine
//!
//! A [`BranchTransaction`] is one participant's unit of work under a root.
//! Try runs unguarded (the driving caller executes it once); Confirm and
//! Cancel each run through their own [`IdempotentGuard`] so End can be
//! retried freely.
//!
//! Transition decisions come from [`tcc_core::decide_phase`]; this module
//! applies them under the branch lock and performs the action calls.

use crate::actions::{BranchContext, ResolvedActions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tcc_core::{
    ActionError, BranchId, BranchState, Completion, Outcome, Phase, PhaseDecision, Result, RootId,
    TccError,
};
use tcc_guards::{GuardOutcome, IdempotentGuard};
use tracing::{debug, info, warn};

/// Caller-supplied description of a branch to join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSpec {
    /// Explicit id; a fresh one is generated when absent
    pub branch_id: Option<BranchId>,
    /// Service whose action table entries the refs name
    pub service_name: String,
    /// Try action name
    pub try_ref: String,
    /// Confirm action name
    pub confirm_ref: String,
    /// Cancel action name
    pub cancel_ref: String,
    /// Whether this branch propagates the root to downstream services
    pub is_propagator: bool,
}

impl BranchSpec {
    /// Spec with a generated branch id
    pub fn new(
        service_name: impl Into<String>,
        try_ref: impl Into<String>,
        confirm_ref: impl Into<String>,
        cancel_ref: impl Into<String>,
    ) -> Self {
        Self {
            branch_id: None,
            service_name: service_name.into(),
            try_ref: try_ref.into(),
            confirm_ref: confirm_ref.into(),
            cancel_ref: cancel_ref.into(),
            is_propagator: false,
        }
    }

    /// Use an explicit branch id
    pub fn with_branch_id(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    /// Mark the branch as a propagator
    pub fn propagating(mut self) -> Self {
        self.is_propagator = true;
        self
    }
}

/// Point-in-time view of a branch for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSnapshot {
    /// Branch id
    pub branch_id: BranchId,
    /// Owning root
    pub root_id: RootId,
    /// Owning service
    pub service_name: String,
    /// Whether the branch propagates the root
    pub is_propagator: bool,
    /// Current state
    pub state: BranchState,
    /// Most recent action failure
    pub last_error: Option<String>,
    /// Whether the Confirm guard has succeeded
    pub confirm_done: bool,
    /// Whether the Cancel guard has succeeded
    pub cancel_done: bool,
}

#[derive(Debug)]
struct BranchRecord {
    state: BranchState,
    last_error: Option<String>,
}

/// One participant's Try/Confirm/Cancel unit of work under a root
pub struct BranchTransaction {
    branch_id: BranchId,
    root_id: RootId,
    spec: BranchSpec,
    actions: ResolvedActions,
    record: Mutex<BranchRecord>,
    // Held for the whole Try; also taken by Confirm/Cancel on a `Registered`
    // branch so they observe the Try's result.
    try_lock: tokio::sync::Mutex<()>,
    confirm_guard: IdempotentGuard<ActionError>,
    cancel_guard: IdempotentGuard<ActionError>,
}

impl BranchTransaction {
    /// Branch in `Registered` with its resolved actions
    pub fn new(
        root_id: RootId,
        branch_id: BranchId,
        spec: BranchSpec,
        actions: ResolvedActions,
    ) -> Self {
        Self {
            branch_id,
            root_id,
            spec,
            actions,
            record: Mutex::new(BranchRecord {
                state: BranchState::Registered,
                last_error: None,
            }),
            try_lock: tokio::sync::Mutex::new(()),
            confirm_guard: IdempotentGuard::new("confirm"),
            cancel_guard: IdempotentGuard::new("cancel"),
        }
    }

    /// Branch id
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    /// Owning root
    pub fn root_id(&self) -> RootId {
        self.root_id
    }

    /// Spec the branch was joined with
    pub fn spec(&self) -> &BranchSpec {
        &self.spec
    }

    /// Current state
    pub fn state(&self) -> BranchState {
        self.record.lock().state
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> BranchSnapshot {
        let record = self.record.lock();
        BranchSnapshot {
            branch_id: self.branch_id,
            root_id: self.root_id,
            service_name: self.spec.service_name.clone(),
            is_propagator: self.spec.is_propagator,
            state: record.state,
            last_error: record.last_error.clone(),
            confirm_done: self.confirm_guard.is_done(),
            cancel_done: self.cancel_guard.is_done(),
        }
    }

    fn context(&self, phase: Phase) -> BranchContext {
        BranchContext {
            root_id: self.root_id,
            branch_id: self.branch_id,
            service_name: self.spec.service_name.clone(),
            phase,
            is_propagator: self.spec.is_propagator,
        }
    }

    fn guard(&self, outcome: Outcome) -> &IdempotentGuard<ActionError> {
        match outcome {
            Outcome::Confirm => &self.confirm_guard,
            Outcome::Cancel => &self.cancel_guard,
        }
    }

    fn transition(&self, record: &mut BranchRecord, to: BranchState, error: Option<&str>) {
        let from = record.state;
        if from == to {
            return;
        }
        record.state = to;
        info!(
            root_id = %self.root_id,
            branch_id = %self.branch_id,
            from = ?from,
            to = ?to,
            error = error.unwrap_or(""),
            "Branch state transition"
        );
    }

    fn state_error(&self, state: BranchState, phase: Phase) -> TccError {
        TccError::BranchStateError {
            branch_id: self.branch_id,
            state,
            phase,
        }
    }

    /// Run the Try action. Only valid while `Registered`.
    pub async fn run_try(&self) -> Result<Completion> {
        let _serial = self.try_lock.lock().await;

        let state = self.state();
        if state != BranchState::Registered {
            debug!(branch_id = %self.branch_id, state = ?state, "Try rejected");
            return Err(self.state_error(state, Phase::Try));
        }

        let ctx = self.context(Phase::Try);
        if let Err(source) = self.actions.try_action.invoke(&ctx).await {
            warn!(
                root_id = %self.root_id,
                branch_id = %self.branch_id,
                error = %source,
                "Try action failed"
            );
            self.record.lock().last_error = Some(source.message.clone());
            return Err(TccError::ActionFailed {
                branch_id: self.branch_id,
                phase: Phase::Try,
                source,
            });
        }

        let mut record = self.record.lock();
        if record.state != BranchState::Registered {
            warn!(
                branch_id = %self.branch_id,
                state = ?record.state,
                "Try finished after branch left Registered"
            );
            return Err(self.state_error(record.state, Phase::Try));
        }
        record.last_error = None;
        self.transition(&mut record, BranchState::Tried, None);
        Ok(Completion::Completed)
    }

    /// Drive the branch to the terminal state of `outcome`.
    ///
    /// Safe to call repeatedly and concurrently: the action runs through the
    /// phase's guard, so only the first success has side effects.
    ///
    /// While the branch is still `Registered` this first waits out any
    /// in-flight Try, so a Try that lands is compensated through the guarded
    /// Cancel rather than skipped by a null compensation.
    pub async fn complete(&self, outcome: Outcome) -> Result<Completion> {
        let phase = Phase::from(outcome);
        let _serial = if self.state() == BranchState::Registered {
            Some(self.try_lock.lock().await)
        } else {
            None
        };

        let decision = {
            let mut record = self.record.lock();
            let decision = tcc_core::decide_phase(record.state, outcome);
            match decision {
                PhaseDecision::Run { .. } => {
                    self.transition(&mut record, BranchState::in_progress(outcome), None);
                }
                PhaseDecision::NullCompensation => {
                    self.transition(
                        &mut record,
                        BranchState::Cancelled,
                        Some("cancelled before try succeeded"),
                    );
                }
                PhaseDecision::Conflict { mark_failed: true } => {
                    let message = format!("{phase} requested while {}", record.state);
                    let current = record.state;
                    self.transition(&mut record, BranchState::Failed, Some(&message));
                    record.last_error = Some(message);
                    return Err(self.state_error(current, phase));
                }
                PhaseDecision::Conflict { mark_failed: false } => {
                    return Err(self.state_error(record.state, phase));
                }
                PhaseDecision::AlreadyDone => {}
            }
            decision
        };

        match decision {
            PhaseDecision::AlreadyDone => return Ok(Completion::AlreadyCompleted),
            PhaseDecision::NullCompensation => return Ok(Completion::Completed),
            _ => {}
        }

        let ctx = self.context(phase);
        let action = self.actions.for_phase(phase);
        let guarded = self.guard(outcome).run(|| action.invoke(&ctx)).await;

        let mut record = self.record.lock();
        match guarded {
            Ok(result) => {
                let in_progress = BranchState::in_progress(outcome);
                let completed = BranchState::completed(outcome);
                if record.state != in_progress && record.state != completed {
                    // A conflicting request failed the branch while the action ran.
                    return Err(self.state_error(record.state, phase));
                }
                record.last_error = None;
                self.transition(&mut record, completed, None);
                Ok(match result {
                    GuardOutcome::Executed => Completion::Completed,
                    GuardOutcome::AlreadyDone => Completion::AlreadyCompleted,
                })
            }
            Err(source) => {
                record.last_error = Some(source.message.clone());
                debug!(
                    root_id = %self.root_id,
                    branch_id = %self.branch_id,
                    state = ?record.state,
                    "Branch stays in progress for retry"
                );
                Err(TccError::ActionFailed {
                    branch_id: self.branch_id,
                    phase,
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for BranchTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchTransaction")
            .field("branch_id", &self.branch_id)
            .field("root_id", &self.root_id)
            .field("service", &self.spec.service_name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{action_fn, BranchAction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tcc_core::ErrorKind;

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn BranchAction> {
        action_fn(move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn branch(confirm: Arc<dyn BranchAction>, cancel: Arc<dyn BranchAction>) -> BranchTransaction {
        let actions = ResolvedActions {
            try_action: action_fn(|_ctx| async { Ok(()) }),
            confirm,
            cancel,
        };
        BranchTransaction::new(
            RootId::new_v4(),
            BranchId::new_v4(),
            BranchSpec::new("inventory", "reserve", "commit", "release"),
            actions,
        )
    }

    #[tokio::test]
    async fn test_try_then_confirm() {
        let confirms = Arc::new(AtomicUsize::new(0));
        let b = branch(counting(confirms.clone()), counting(Arc::default()));

        assert_eq!(b.run_try().await.unwrap(), Completion::Completed);
        assert_eq!(b.state(), BranchState::Tried);
        assert_eq!(
            b.complete(Outcome::Confirm).await.unwrap(),
            Completion::Completed
        );
        assert_eq!(
            b.complete(Outcome::Confirm).await.unwrap(),
            Completion::AlreadyCompleted
        );
        assert_eq!(b.state(), BranchState::Confirmed);
        assert_eq!(confirms.load(Ordering::SeqCst), 1);
        assert!(b.snapshot().confirm_done);
    }

    #[tokio::test]
    async fn test_second_try_is_state_error() {
        let b = branch(counting(Arc::default()), counting(Arc::default()));
        b.run_try().await.unwrap();
        let err = b.run_try().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BranchStateError);
    }

    #[tokio::test]
    async fn test_confirm_before_try_fails_branch() {
        let b = branch(counting(Arc::default()), counting(Arc::default()));
        let err = b.complete(Outcome::Confirm).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BranchStateError);
        assert_eq!(b.state(), BranchState::Failed);
        assert!(b.snapshot().last_error.is_some());
    }

    #[tokio::test]
    async fn test_confirm_after_cancel_keeps_cancelled() {
        let b = branch(counting(Arc::default()), counting(Arc::default()));
        b.run_try().await.unwrap();
        b.complete(Outcome::Cancel).await.unwrap();

        let err = b.complete(Outcome::Confirm).await.unwrap_err();
        assert!(matches!(
            err,
            TccError::BranchStateError {
                state: BranchState::Cancelled,
                phase: Phase::Confirm,
                ..
            }
        ));
        assert_eq!(b.state(), BranchState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_without_try_skips_action() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let b = branch(counting(Arc::default()), counting(cancels.clone()));

        assert_eq!(
            b.complete(Outcome::Cancel).await.unwrap(),
            Completion::Completed
        );
        assert_eq!(b.state(), BranchState::Cancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 0);

        // Try arriving after the null compensation must not resurrect the branch.
        let err = b.run_try().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BranchStateError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_try_compensates() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let actions = ResolvedActions {
            try_action: action_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }),
            confirm: counting(Arc::default()),
            cancel: counting(cancels.clone()),
        };
        let b = Arc::new(BranchTransaction::new(
            RootId::new_v4(),
            BranchId::new_v4(),
            BranchSpec::new("inventory", "reserve", "commit", "release"),
            actions,
        ));

        let trying = tokio::spawn({
            let b = b.clone();
            async move { b.run_try().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            b.complete(Outcome::Cancel).await.unwrap(),
            Completion::Completed
        );
        assert_eq!(trying.await.unwrap().unwrap(), Completion::Completed);
        assert_eq!(b.state(), BranchState::Cancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_failed_try_is_null_compensation() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let actions = ResolvedActions {
            try_action: action_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Err(ActionError::new("out of stock"))
            }),
            confirm: counting(Arc::default()),
            cancel: counting(cancels.clone()),
        };
        let b = Arc::new(BranchTransaction::new(
            RootId::new_v4(),
            BranchId::new_v4(),
            BranchSpec::new("inventory", "reserve", "commit", "release"),
            actions,
        ));

        let trying = tokio::spawn({
            let b = b.clone();
            async move { b.run_try().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        b.complete(Outcome::Cancel).await.unwrap();
        assert_eq!(
            trying.await.unwrap().unwrap_err().kind(),
            ErrorKind::ActionFailed
        );
        assert_eq!(b.state(), BranchState::Cancelled);
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_confirm_stays_confirming() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let flaky = {
            let attempts = attempts.clone();
            action_fn(move |_ctx| {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ActionError::new("ledger locked"))
                    } else {
                        Ok(())
                    }
                }
            })
        };
        let b = branch(flaky, counting(Arc::default()));
        b.run_try().await.unwrap();

        let err = b.complete(Outcome::Confirm).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActionFailed);
        assert_eq!(b.state(), BranchState::Confirming);
        assert_eq!(b.snapshot().last_error.as_deref(), Some("ledger locked"));

        assert_eq!(
            b.complete(Outcome::Confirm).await.unwrap(),
            Completion::Completed
        );
        assert_eq!(b.state(), BranchState::Confirmed);
        assert_eq!(b.snapshot().last_error, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
