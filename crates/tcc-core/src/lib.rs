//! # TCC Core - Shared Vocabulary
//!
//! Identifiers, lifecycle states, the unified error type and protocol error
//! codes used by the guard, coordinator and testkit crates.
//!
//! ## Architecture
//!
//! - **types**: `RootId`, `BranchId`, `ScopeKey`, `Outcome`, `Completion`
//! - **state**: branch/root states and the pure transition rules
//! - **errors**: `TccError`, `ErrorKind`, `ActionError`
//! - **codes**: offset-based numeric error codes
//! - **config**: `CoordinatorConfig`

#![allow(missing_docs)]

pub mod codes;
pub mod config;
pub mod errors;
pub mod state;
pub mod types;

pub use codes::{ErrorCode, Operation};
pub use config::CoordinatorConfig;
pub use errors::{ActionError, ErrorKind, Phase, Result, TccError};
pub use state::{decide_end, decide_phase, BranchState, EndDecision, PhaseDecision, RootState};
pub use types::{BranchId, Completion, Outcome, RootId, ScopeKey};
