//! Root transaction: the branch list plus the root-level state.

use crate::branch::{BranchSnapshot, BranchTransaction};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tcc_core::{
    BranchId, BranchState, EndDecision, Operation, Outcome, Result, RootId, RootState, ScopeKey,
    TccError,
};
use tracing::info;

/// Point-in-time view of a root and its branches, in join order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSnapshot {
    /// Root id
    pub root_id: RootId,
    /// Scope the root holds
    pub scope: ScopeKey,
    /// Current state
    pub state: RootState,
    /// Outcome fixed by the first End
    pub outcome: Option<Outcome>,
    /// Branches in join order
    pub branches: Vec<BranchSnapshot>,
}

#[derive(Debug)]
struct RootRecord {
    state: RootState,
    // Outcome fixed by the first End; later Ends must match it.
    outcome: Option<Outcome>,
    branches: Vec<Arc<BranchTransaction>>,
}

/// Root transaction and its branches
#[derive(Debug)]
pub struct RootTransaction {
    root_id: RootId,
    scope: ScopeKey,
    record: RwLock<RootRecord>,
    // One End attempt at a time per root.
    end_lock: tokio::sync::Mutex<()>,
}

impl RootTransaction {
    /// Active root with no branches
    pub fn new(root_id: RootId, scope: ScopeKey) -> Self {
        Self {
            root_id,
            scope,
            record: RwLock::new(RootRecord {
                state: RootState::Active,
                outcome: None,
                branches: Vec::new(),
            }),
            end_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Root id
    pub fn root_id(&self) -> RootId {
        self.root_id
    }

    /// Scope the root holds
    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    /// Current state
    pub fn state(&self) -> RootState {
        self.record.read().state
    }

    /// Outcome fixed by the first End
    pub fn outcome(&self) -> Option<Outcome> {
        self.record.read().outcome
    }

    /// Branch by id
    pub fn branch(&self, branch_id: BranchId) -> Option<Arc<BranchTransaction>> {
        self.record
            .read()
            .branches
            .iter()
            .find(|b| b.branch_id() == branch_id)
            .cloned()
    }

    /// Branches in join order
    pub fn branches(&self) -> Vec<Arc<BranchTransaction>> {
        self.record.read().branches.clone()
    }

    /// Number of joined branches
    pub fn branch_count(&self) -> usize {
        self.record.read().branches.len()
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> RootSnapshot {
        let record = self.record.read();
        RootSnapshot {
            root_id: self.root_id,
            scope: self.scope.clone(),
            state: record.state,
            outcome: record.outcome,
            branches: record.branches.iter().map(|b| b.snapshot()).collect(),
        }
    }

    fn state_error(&self, state: RootState, operation: Operation) -> TccError {
        TccError::RootStateError {
            root_id: self.root_id,
            state,
            operation,
        }
    }

    /// Append a branch. Only allowed while the root is `Active`.
    pub fn add_branch(&self, branch: Arc<BranchTransaction>) -> Result<()> {
        let mut record = self.record.write();
        if record.state != RootState::Active {
            return Err(self.state_error(record.state, Operation::Join));
        }
        let branch_id = branch.branch_id();
        if record.branches.iter().any(|b| b.branch_id() == branch_id) {
            return Err(TccError::BranchAlreadyExists {
                root_id: self.root_id,
                branch_id,
            });
        }
        record.branches.push(branch);
        Ok(())
    }

    /// Undo a Join the transaction manager refused.
    ///
    /// Only an untouched (`Registered`) branch of an `Active` root is removed.
    pub(crate) fn detach_branch(&self, branch_id: BranchId) -> bool {
        let mut record = self.record.write();
        if record.state != RootState::Active {
            return false;
        }
        let before = record.branches.len();
        record
            .branches
            .retain(|b| b.branch_id() != branch_id || b.state() != BranchState::Registered);
        record.branches.len() != before
    }

    /// Serialize End attempts on this root
    pub(crate) async fn lock_end(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.end_lock.lock().await
    }

    /// Fix the End outcome and move to its in-progress state.
    ///
    /// Returns [`EndDecision::AlreadyDone`] when the root already reached the
    /// requested terminal state; conflicting outcomes are a state error.
    pub fn begin_end(&self, outcome: Outcome) -> Result<EndDecision> {
        let mut record = self.record.write();
        let decision = tcc_core::decide_end(record.state, record.outcome, outcome);
        match decision {
            EndDecision::FanOut => {
                record.outcome = Some(outcome);
                self.transition(&mut record, RootState::in_progress(outcome));
                Ok(decision)
            }
            EndDecision::AlreadyDone => Ok(decision),
            EndDecision::Conflict => Err(self.state_error(record.state, Operation::End)),
        }
    }

    /// Force a state, e.g. `TimedOut` or the final terminal state
    pub fn set_state(&self, to: RootState) {
        let mut record = self.record.write();
        self.transition(&mut record, to);
    }

    fn transition(&self, record: &mut RootRecord, to: RootState) {
        let from = record.state;
        if from == to {
            return;
        }
        record.state = to;
        info!(
            root_id = %self.root_id,
            scope = %self.scope,
            from = ?from,
            to = ?to,
            "Root state transition"
        );
    }
}
