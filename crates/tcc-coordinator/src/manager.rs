//! Transaction manager client
//!
//! The coordinator reports every root and branch to a transaction manager
//! that records their existence and state. The wire transport is out of
//! scope: implementations of [`TransactionManagerClient`] carry the
//! serializable request types below over whatever RPC they use.
//! [`LocalTransactionManager`] keeps the records in-process.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tcc_core::{BranchId, BranchState, Outcome, Result, RootId, RootState, ScopeKey, TccError};
use tracing::debug;

/// Register a new root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginRootRequest {
    /// Root id
    pub root_id: RootId,
    /// Scope the root holds
    pub scope: ScopeKey,
}

/// Acknowledged root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginRootResponse {
    /// Root id
    pub root_id: RootId,
}

/// Register a branch under a root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinBranchRequest {
    /// Owning root
    pub root_id: RootId,
    /// Branch id
    pub branch_id: BranchId,
    /// Owning service
    pub service_name: String,
    /// Try action name
    pub try_ref: String,
    /// Confirm action name
    pub confirm_ref: String,
    /// Cancel action name
    pub cancel_ref: String,
    /// Whether the branch propagates the root
    pub is_propagator: bool,
}

/// Acknowledged branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinBranchResponse {
    /// Branch id
    pub branch_id: BranchId,
}

/// Result of one branch Confirm/Cancel attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchResultReport {
    /// Owning root
    pub root_id: RootId,
    /// Branch id
    pub branch_id: BranchId,
    /// Phase outcome that was driven
    pub outcome: Outcome,
    /// Branch state afterwards
    pub state: BranchState,
    /// Failure message, if any
    pub error: Option<String>,
}

/// Record the final outcome of a root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndRootRequest {
    /// Root id
    pub root_id: RootId,
    /// Outcome reached
    pub outcome: Outcome,
    /// Final root state
    pub state: RootState,
    /// Final state of every branch
    pub branches: Vec<(BranchId, BranchState)>,
}

/// Acknowledged end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndRootResponse {
    /// Root id
    pub root_id: RootId,
    /// State the manager recorded
    pub state: RootState,
}

/// Client for the remote transaction manager
#[async_trait]
pub trait TransactionManagerClient: Send + Sync {
    async fn begin_root(&self, request: BeginRootRequest) -> Result<BeginRootResponse>;

    async fn join_branch(&self, request: JoinBranchRequest) -> Result<JoinBranchResponse>;

    async fn report_branch_result(&self, report: BranchResultReport) -> Result<()>;

    async fn end_root(&self, request: EndRootRequest) -> Result<EndRootResponse>;
}

#[derive(Debug, Clone)]
struct ManagedRoot {
    scope: ScopeKey,
    state: RootState,
    branches: BTreeMap<BranchId, BranchState>,
}

/// In-process transaction manager that records roots and branches
#[derive(Debug, Default)]
pub struct LocalTransactionManager {
    roots: Mutex<HashMap<RootId, ManagedRoot>>,
    reports: Mutex<Vec<BranchResultReport>>,
}

impl LocalTransactionManager {
    /// Empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded state of a root
    pub fn root_state(&self, root_id: RootId) -> Option<RootState> {
        self.roots.lock().get(&root_id).map(|r| r.state)
    }

    /// Recorded scope of a root
    pub fn root_scope(&self, root_id: RootId) -> Option<ScopeKey> {
        self.roots.lock().get(&root_id).map(|r| r.scope.clone())
    }

    /// Recorded state of a branch
    pub fn branch_state(&self, root_id: RootId, branch_id: BranchId) -> Option<BranchState> {
        self.roots
            .lock()
            .get(&root_id)
            .and_then(|r| r.branches.get(&branch_id).copied())
    }

    /// Every branch report received, in arrival order
    pub fn reports(&self) -> Vec<BranchResultReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl TransactionManagerClient for LocalTransactionManager {
    async fn begin_root(&self, request: BeginRootRequest) -> Result<BeginRootResponse> {
        let mut roots = self.roots.lock();
        if let Some(existing) = roots
            .iter()
            .find(|(_, r)| r.scope == request.scope && !r.state.is_terminal())
            .map(|(id, _)| *id)
        {
            return Err(TccError::RootAlreadyActive {
                scope: request.scope,
                existing,
            });
        }
        roots.insert(
            request.root_id,
            ManagedRoot {
                scope: request.scope,
                state: RootState::Active,
                branches: BTreeMap::new(),
            },
        );
        debug!(root_id = %request.root_id, "Transaction manager recorded root");
        Ok(BeginRootResponse {
            root_id: request.root_id,
        })
    }

    async fn join_branch(&self, request: JoinBranchRequest) -> Result<JoinBranchResponse> {
        let mut roots = self.roots.lock();
        let root = roots
            .get_mut(&request.root_id)
            .ok_or(TccError::RootNotFound {
                root_id: request.root_id,
            })?;
        if root.branches.contains_key(&request.branch_id) {
            return Err(TccError::BranchAlreadyExists {
                root_id: request.root_id,
                branch_id: request.branch_id,
            });
        }
        root.branches
            .insert(request.branch_id, BranchState::Registered);
        Ok(JoinBranchResponse {
            branch_id: request.branch_id,
        })
    }

    async fn report_branch_result(&self, report: BranchResultReport) -> Result<()> {
        {
            let mut roots = self.roots.lock();
            let root = roots
                .get_mut(&report.root_id)
                .ok_or(TccError::RootNotFound {
                    root_id: report.root_id,
                })?;
            let state = root
                .branches
                .get_mut(&report.branch_id)
                .ok_or(TccError::BranchNotFound {
                    root_id: report.root_id,
                    branch_id: report.branch_id,
                })?;
            *state = report.state;
            root.state = RootState::in_progress(report.outcome);
        }
        self.reports.lock().push(report);
        Ok(())
    }

    async fn end_root(&self, request: EndRootRequest) -> Result<EndRootResponse> {
        let mut roots = self.roots.lock();
        let root = roots
            .get_mut(&request.root_id)
            .ok_or(TccError::RootNotFound {
                root_id: request.root_id,
            })?;
        for (branch_id, state) in &request.branches {
            root.branches.insert(*branch_id, *state);
        }
        root.state = request.state;
        Ok(EndRootResponse {
            root_id: request.root_id,
            state: root.state,
        })
    }
}
