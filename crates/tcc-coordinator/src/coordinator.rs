//! Root transaction orchestration
//!
//! [`Coordinator`] drives the Begin → Join → Try → End lifecycle:
//!
//! 1. `begin` claims a scope and records the root with the transaction manager
//! 2. `join` resolves a branch's actions and appends it to the root
//! 3. `try_branch` runs a branch's Try
//! 4. `end` fans Confirm or Cancel out to every branch concurrently, waits up
//!    to the configured deadline, and aggregates
//!
//! End never picks an alternate outcome. When some branches do not reach the
//! requested state the caller retries End; branch guards make the retry a
//! no-op for branches that already succeeded.
//!
//! Branch tasks are spawned and detached. A deadline stops the wait, not the
//! work: a Confirm still running when End times out finishes and records its
//! result on the branch.

use crate::actions::ActionTable;
use crate::branch::{BranchSpec, BranchTransaction};
use crate::manager::{
    BeginRootRequest, BranchResultReport, EndRootRequest, JoinBranchRequest,
    LocalTransactionManager, TransactionManagerClient,
};
use crate::root::{RootSnapshot, RootTransaction};
use crate::store::{InMemoryStore, TransactionStore};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tcc_core::{
    BranchId, BranchState, Completion, CoordinatorConfig, EndDecision, Operation, Outcome,
    Result, RootId, RootState, ScopeKey, TccError,
};
use tracing::{debug, error, info, instrument, warn};

/// Result of one branch within an End attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchReport {
    /// Branch id
    pub branch_id: BranchId,
    /// Branch state after the attempt
    pub state: BranchState,
    /// What this attempt did, or why it failed
    pub result: std::result::Result<Completion, TccError>,
}

/// Successful End: every branch reached the requested terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndReport {
    /// Ended root
    pub root_id: RootId,
    /// Requested outcome
    pub outcome: Outcome,
    /// `AlreadyCompleted` when an earlier End already finished
    pub completion: Completion,
    /// Final root state
    pub state: RootState,
    /// Per-branch results in join order; empty when the root had already ended
    pub branches: Vec<BranchReport>,
}

/// Entry point for the root/branch lifecycle.
///
/// Cheap to clone; clones share the store, action table and manager.
#[derive(Clone)]
pub struct Coordinator {
    config: CoordinatorConfig,
    actions: Arc<ActionTable>,
    store: Arc<dyn TransactionStore>,
    manager: Arc<dyn TransactionManagerClient>,
}

impl Coordinator {
    /// Coordinator with an in-memory store and an in-process transaction manager
    pub fn new(config: CoordinatorConfig, actions: Arc<ActionTable>) -> Self {
        Self {
            config,
            actions,
            store: Arc::new(InMemoryStore::new()),
            manager: Arc::new(LocalTransactionManager::new()),
        }
    }

    /// Replace the root store
    pub fn with_store(mut self, store: Arc<dyn TransactionStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the transaction manager client
    pub fn with_manager(mut self, manager: Arc<dyn TransactionManagerClient>) -> Self {
        self.manager = manager;
        self
    }

    /// Runtime configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Registered actions
    pub fn actions(&self) -> &Arc<ActionTable> {
        &self.actions
    }

    fn root(&self, root_id: RootId) -> Result<Arc<RootTransaction>> {
        self.store
            .root(root_id)
            .ok_or(TccError::RootNotFound { root_id })
    }

    fn branch(&self, root_id: RootId, branch_id: BranchId) -> Result<Arc<BranchTransaction>> {
        self.root(root_id)?
            .branch(branch_id)
            .ok_or(TccError::BranchNotFound { root_id, branch_id })
    }

    /// Start a root transaction for `scope`.
    #[instrument(skip_all, fields(scope = %scope))]
    pub async fn begin(&self, scope: ScopeKey) -> Result<RootId> {
        let root_id = RootId::new_v4();
        let root = Arc::new(RootTransaction::new(root_id, scope.clone()));
        self.store.insert_root(root)?;

        if let Err(error) = self
            .manager
            .begin_root(BeginRootRequest { root_id, scope })
            .await
        {
            warn!(root_id = %root_id, error = %error, "Transaction manager refused root");
            self.store.remove_root(root_id);
            return Err(error);
        }

        info!(root_id = %root_id, "Root transaction begun");
        Ok(root_id)
    }

    /// Register a branch under an active root.
    #[instrument(skip_all, fields(root_id = %root_id, service = %spec.service_name))]
    pub async fn join(&self, root_id: RootId, spec: BranchSpec) -> Result<BranchId> {
        let root = self.root(root_id)?;
        // End cannot start until the manager has accepted or refused the branch.
        let _end = root.lock_end().await;
        let state = root.state();
        if state != RootState::Active {
            return Err(TccError::RootStateError {
                root_id,
                state,
                operation: Operation::Join,
            });
        }

        let actions = self.actions.resolve(
            &spec.service_name,
            &spec.try_ref,
            &spec.confirm_ref,
            &spec.cancel_ref,
        )?;
        let branch_id = spec.branch_id.unwrap_or_else(BranchId::new_v4);
        let request = JoinBranchRequest {
            root_id,
            branch_id,
            service_name: spec.service_name.clone(),
            try_ref: spec.try_ref.clone(),
            confirm_ref: spec.confirm_ref.clone(),
            cancel_ref: spec.cancel_ref.clone(),
            is_propagator: spec.is_propagator,
        };

        let branch = Arc::new(BranchTransaction::new(root_id, branch_id, spec, actions));
        root.add_branch(branch)?;

        if let Err(error) = self.manager.join_branch(request).await {
            warn!(branch_id = %branch_id, error = %error, "Transaction manager refused branch");
            if !root.detach_branch(branch_id) {
                error!(branch_id = %branch_id, "Refused branch could not be detached");
            }
            return Err(error);
        }

        info!(branch_id = %branch_id, "Branch joined");
        Ok(branch_id)
    }

    /// Run a branch's Try. The root must still be active.
    #[instrument(skip_all, fields(root_id = %root_id, branch_id = %branch_id))]
    pub async fn try_branch(&self, root_id: RootId, branch_id: BranchId) -> Result<Completion> {
        let root = self.root(root_id)?;
        let branch = root
            .branch(branch_id)
            .ok_or(TccError::BranchNotFound { root_id, branch_id })?;
        let state = root.state();
        if state != RootState::Active {
            return Err(TccError::RootStateError {
                root_id,
                state,
                operation: Operation::Try,
            });
        }
        branch.run_try().await
    }

    /// Confirm a single branch without ending the root
    pub async fn confirm_branch(&self, root_id: RootId, branch_id: BranchId) -> Result<Completion> {
        self.complete_branch(root_id, branch_id, Outcome::Confirm)
            .await
    }

    /// Cancel a single branch without ending the root
    pub async fn cancel_branch(&self, root_id: RootId, branch_id: BranchId) -> Result<Completion> {
        self.complete_branch(root_id, branch_id, Outcome::Cancel)
            .await
    }

    #[instrument(skip_all, fields(root_id = %root_id, branch_id = %branch_id, outcome = %outcome))]
    async fn complete_branch(
        &self,
        root_id: RootId,
        branch_id: BranchId,
        outcome: Outcome,
    ) -> Result<Completion> {
        let branch = self.branch(root_id, branch_id)?;
        let report = drive_branch(
            branch,
            outcome,
            self.manager.clone(),
            self.config.report_branch_results,
        )
        .await;
        report.result
    }

    /// End the root with `outcome`, driving every branch concurrently.
    #[instrument(skip_all, fields(root_id = %root_id, outcome = %outcome))]
    pub async fn end(&self, root_id: RootId, outcome: Outcome) -> Result<EndReport> {
        let root = self.root(root_id)?;
        let _end = root.lock_end().await;

        if root.begin_end(outcome)? == EndDecision::AlreadyDone {
            debug!("Root already ended with this outcome");
            return Ok(EndReport {
                root_id,
                outcome,
                completion: Completion::AlreadyCompleted,
                state: root.state(),
                branches: Vec::new(),
            });
        }

        let branches = root.branches();
        let started = Instant::now();
        let tasks: Vec<_> = branches
            .iter()
            .map(|branch| {
                tokio::spawn(drive_branch(
                    branch.clone(),
                    outcome,
                    self.manager.clone(),
                    self.config.report_branch_results,
                ))
            })
            .collect();

        let joined = match tokio::time::timeout(self.config.end_timeout(), join_all(tasks)).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                let (pending, failed) = unfinished(&branches, outcome);
                root.set_state(RootState::TimedOut);
                warn!(
                    pending = pending.len(),
                    failed = failed.len(),
                    "End deadline elapsed"
                );
                return Err(TccError::Timeout {
                    root_id,
                    outcome,
                    elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    pending,
                    failed,
                });
            }
        };

        let reports: Vec<BranchReport> = branches
            .iter()
            .zip(joined)
            .map(|(branch, joined)| match joined {
                Ok(report) => report,
                Err(join_error) => {
                    warn!(branch_id = %branch.branch_id(), error = %join_error, "Branch task aborted");
                    BranchReport {
                        branch_id: branch.branch_id(),
                        state: branch.state(),
                        result: Err(TccError::ActionFailed {
                            branch_id: branch.branch_id(),
                            phase: outcome.into(),
                            source: join_error.to_string().into(),
                        }),
                    }
                }
            })
            .collect();

        let (pending, failed) = unfinished(&branches, outcome);
        if !pending.is_empty() || !failed.is_empty() {
            warn!(
                pending = pending.len(),
                failed = failed.len(),
                "Not all branches completed"
            );
            return Err(TccError::NotAllBranchesCompleted {
                root_id,
                outcome,
                pending,
                failed,
            });
        }

        let final_state = RootState::completed(outcome);
        self.manager
            .end_root(EndRootRequest {
                root_id,
                outcome,
                state: final_state,
                branches: reports.iter().map(|r| (r.branch_id, r.state)).collect(),
            })
            .await?;
        root.set_state(final_state);

        info!(branches = reports.len(), "Root transaction ended");
        Ok(EndReport {
            root_id,
            outcome,
            completion: Completion::Completed,
            state: final_state,
            branches: reports,
        })
    }

    /// Current view of a root
    pub fn root_snapshot(&self, root_id: RootId) -> Result<RootSnapshot> {
        Ok(self.root(root_id)?.snapshot())
    }

    /// Non-terminal root currently holding `scope`, if any
    pub fn active_root(&self, scope: &ScopeKey) -> Option<RootId> {
        self.store.active_root(scope).map(|r| r.root_id())
    }

    /// Remove a terminal root from the store, returning its final snapshot
    pub fn archive(&self, root_id: RootId) -> Result<RootSnapshot> {
        let root = self.root(root_id)?;
        let state = root.state();
        if !state.is_terminal() {
            return Err(TccError::RootStateError {
                root_id,
                state,
                operation: Operation::Archive,
            });
        }
        self.store.remove_root(root_id);
        debug!(root_id = %root_id, "Root archived");
        Ok(root.snapshot())
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// Split branches short of `outcome` into (pending, failed).
///
/// Pending branches can still get there on a retry; failed ones are terminal
/// in some other state.
fn unfinished(
    branches: &[Arc<BranchTransaction>],
    outcome: Outcome,
) -> (Vec<BranchId>, Vec<BranchId>) {
    let target = BranchState::completed(outcome);
    let mut pending = Vec::new();
    let mut failed = Vec::new();
    for branch in branches {
        let state = branch.state();
        if state == target {
            continue;
        }
        if state.is_terminal() {
            failed.push(branch.branch_id());
        } else {
            pending.push(branch.branch_id());
        }
    }
    (pending, failed)
}

/// Run one branch's phase and report the result to the transaction manager.
async fn drive_branch(
    branch: Arc<BranchTransaction>,
    outcome: Outcome,
    manager: Arc<dyn TransactionManagerClient>,
    report: bool,
) -> BranchReport {
    let result = branch.complete(outcome).await;
    let state = branch.state();

    if report && result != Ok(Completion::AlreadyCompleted) {
        let sent = manager
            .report_branch_result(BranchResultReport {
                root_id: branch.root_id(),
                branch_id: branch.branch_id(),
                outcome,
                state,
                error: result.as_ref().err().map(ToString::to_string),
            })
            .await;
        if let Err(error) = sent {
            warn!(branch_id = %branch.branch_id(), error = %error, "Failed to report branch result");
        }
    }

    BranchReport {
        branch_id: branch.branch_id(),
        state,
        result,
    }
}
