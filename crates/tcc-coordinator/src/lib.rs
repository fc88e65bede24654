#![deny(clippy::await_holding_lock)]
//! # TCC Coordinator - Branch Lifecycle and Root Orchestration
//!
//! Drives Try-Confirm-Cancel branch transactions under a root transaction.
//!
//! ## Architecture
//!
//! - **actions**: named Try/Confirm/Cancel callbacks, resolved at Join
//! - **branch**: per-branch state machine with guarded Confirm/Cancel
//! - **root**: root state and the append-only branch list
//! - **store**: injectable root lookup tables
//! - **manager**: transaction manager client trait and in-process manager
//! - **coordinator**: Begin / Join / Try / End
//!
//! ## Guarantees
//!
//! - Confirm and Cancel side effects happen at most once per branch
//! - End is retryable until the root reaches Confirmed or Cancelled
//! - Failures carry an [`ErrorKind`](tcc_core::ErrorKind) and a numeric code

/// Branch action trait and action table
pub mod actions;
/// Branch state machine
pub mod branch;
/// Begin / Join / Try / End orchestration
pub mod coordinator;
/// Transaction manager client
pub mod manager;
/// Common imports
pub mod prelude;
/// Root transactions
pub mod root;
/// Root storage
pub mod store;

pub use actions::{action_fn, ActionTable, BranchAction, BranchContext};
pub use branch::{BranchSnapshot, BranchSpec, BranchTransaction};
pub use coordinator::{BranchReport, Coordinator, EndReport};
pub use manager::{LocalTransactionManager, TransactionManagerClient};
pub use root::{RootSnapshot, RootTransaction};
pub use store::{InMemoryStore, TransactionStore};
