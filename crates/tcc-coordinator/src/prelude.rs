//! TCC coordinator prelude.
//!
//! Curated re-exports for services driving transactions through a coordinator.

pub use crate::actions::{action_fn, ActionTable, BranchAction, BranchContext};
pub use crate::branch::BranchSpec;
pub use crate::coordinator::{Coordinator, EndReport};
pub use tcc_core::{
    ActionError, BranchId, Completion, CoordinatorConfig, ErrorKind, Outcome, RootId, ScopeKey,
    TccError,
};
