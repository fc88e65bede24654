//! Unified error system for the TCC coordinator
//!
//! Every public operation fails with a [`TccError`]. Callers branch on
//! [`TccError::kind`] (or the numeric [`ErrorCode`](crate::codes::ErrorCode)),
//! never on message text.

use crate::codes::{ErrorCode, Operation};
use crate::state::{BranchState, RootState};
use crate::types::{BranchId, Outcome, RootId, ScopeKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure returned by a Try, Confirm or Cancel action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Which action of a branch an error or event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Try,
    Confirm,
    Cancel,
}

impl From<Outcome> for Phase {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Confirm => Phase::Confirm,
            Outcome::Cancel => Phase::Cancel,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Try => f.write_str("try"),
            Phase::Confirm => f.write_str("confirm"),
            Phase::Cancel => f.write_str("cancel"),
        }
    }
}

/// Discriminant of [`TccError`], stable across message changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    RootNotFound,
    RootAlreadyActive,
    RootStateError,
    BranchNotFound,
    BranchAlreadyExists,
    BranchStateError,
    ActionNotRegistered,
    ActionFailed,
    NotAllBranchesCompleted,
    Timeout,
    TransactionManager,
    InvalidConfig,
}

impl ErrorKind {
    /// Every kind, in code-offset order
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::RootNotFound,
        ErrorKind::RootAlreadyActive,
        ErrorKind::RootStateError,
        ErrorKind::BranchNotFound,
        ErrorKind::BranchAlreadyExists,
        ErrorKind::BranchStateError,
        ErrorKind::ActionNotRegistered,
        ErrorKind::ActionFailed,
        ErrorKind::NotAllBranchesCompleted,
        ErrorKind::Timeout,
        ErrorKind::TransactionManager,
        ErrorKind::InvalidConfig,
    ];

    /// Addressing errors indicate a caller or protocol bug and are never retried
    pub fn is_addressing(self) -> bool {
        matches!(
            self,
            ErrorKind::RootNotFound
                | ErrorKind::RootAlreadyActive
                | ErrorKind::BranchNotFound
                | ErrorKind::BranchAlreadyExists
        )
    }

    /// Whether re-issuing the same request may succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ActionFailed
                | ErrorKind::NotAllBranchesCompleted
                | ErrorKind::Timeout
                | ErrorKind::TransactionManager
        )
    }
}

/// Unified error type for all coordinator operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum TccError {
    #[error("root transaction {root_id} not found")]
    RootNotFound { root_id: RootId },

    #[error("scope {scope} already has active root transaction {existing}")]
    RootAlreadyActive { scope: ScopeKey, existing: RootId },

    #[error("root transaction {root_id} is {state}, cannot {operation}")]
    RootStateError {
        root_id: RootId,
        state: RootState,
        operation: Operation,
    },

    #[error("branch {branch_id} not found under {root_id}")]
    BranchNotFound { root_id: RootId, branch_id: BranchId },

    #[error("branch {branch_id} already exists under {root_id}")]
    BranchAlreadyExists { root_id: RootId, branch_id: BranchId },

    #[error("branch {branch_id} is {state}, cannot {phase}")]
    BranchStateError {
        branch_id: BranchId,
        state: BranchState,
        phase: Phase,
    },

    #[error("no {phase} action registered as {service}.{action}")]
    ActionNotRegistered {
        service: String,
        action: String,
        phase: Phase,
    },

    #[error("{phase} action of branch {branch_id} failed: {source}")]
    ActionFailed {
        branch_id: BranchId,
        phase: Phase,
        source: ActionError,
    },

    #[error(
        "not all branches of {root_id} reached {outcome}: {} pending, {} failed",
        pending.len(),
        failed.len()
    )]
    NotAllBranchesCompleted {
        root_id: RootId,
        outcome: Outcome,
        pending: Vec<BranchId>,
        failed: Vec<BranchId>,
    },

    #[error(
        "{outcome} of {root_id} timed out after {elapsed_ms}ms: {} pending, {} failed",
        pending.len(),
        failed.len()
    )]
    Timeout {
        root_id: RootId,
        outcome: Outcome,
        elapsed_ms: u64,
        /// Branches still in a non-terminal state at the deadline
        pending: Vec<BranchId>,
        /// Branches already terminal in the wrong state
        failed: Vec<BranchId>,
    },

    #[error("transaction manager error: {message}")]
    TransactionManager { message: String },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl TccError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TccError::RootNotFound { .. } => ErrorKind::RootNotFound,
            TccError::RootAlreadyActive { .. } => ErrorKind::RootAlreadyActive,
            TccError::RootStateError { .. } => ErrorKind::RootStateError,
            TccError::BranchNotFound { .. } => ErrorKind::BranchNotFound,
            TccError::BranchAlreadyExists { .. } => ErrorKind::BranchAlreadyExists,
            TccError::BranchStateError { .. } => ErrorKind::BranchStateError,
            TccError::ActionNotRegistered { .. } => ErrorKind::ActionNotRegistered,
            TccError::ActionFailed { .. } => ErrorKind::ActionFailed,
            TccError::NotAllBranchesCompleted { .. } => ErrorKind::NotAllBranchesCompleted,
            TccError::Timeout { .. } => ErrorKind::Timeout,
            TccError::TransactionManager { .. } => ErrorKind::TransactionManager,
            TccError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
        }
    }

    /// Numeric protocol code of this error when raised by `operation`
    pub fn code(&self, operation: Operation) -> ErrorCode {
        ErrorCode::of(operation, self.kind())
    }

    /// Create a transaction manager error
    pub fn transaction_manager(message: impl Into<String>) -> Self {
        Self::TransactionManager {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Standard Result type for coordinator operations
pub type Result<T> = std::result::Result<T, TccError>;
