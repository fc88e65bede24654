//! Protocol error codes
//!
//! Codes are offset-based: each operation owns a block of 100 codes and each
//! [`ErrorKind`] has a fixed offset within the block, so
//! `code = operation.base() + kind.offset()`. The values are stable wire
//! identifiers; they are surfaced to callers and sent to the transaction
//! manager as opaque numbers.

use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinator operation an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Begin,
    Join,
    Try,
    Confirm,
    Cancel,
    End,
    Archive,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Begin,
        Operation::Join,
        Operation::Try,
        Operation::Confirm,
        Operation::Cancel,
        Operation::End,
        Operation::Archive,
    ];

    pub const fn base(self) -> u32 {
        match self {
            Operation::Begin => 1100,
            Operation::Join => 1200,
            Operation::Try => 1300,
            Operation::Confirm => 1400,
            Operation::Cancel => 1500,
            Operation::End => 1600,
            Operation::Archive => 1700,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Begin => "begin",
            Operation::Join => "join",
            Operation::Try => "try",
            Operation::Confirm => "confirm",
            Operation::Cancel => "cancel",
            Operation::End => "end",
            Operation::Archive => "archive",
        };
        f.write_str(name)
    }
}

impl ErrorKind {
    pub const fn offset(self) -> u32 {
        match self {
            ErrorKind::RootNotFound => 1,
            ErrorKind::RootAlreadyActive => 2,
            ErrorKind::RootStateError => 3,
            ErrorKind::BranchNotFound => 11,
            ErrorKind::BranchAlreadyExists => 12,
            ErrorKind::BranchStateError => 13,
            ErrorKind::ActionNotRegistered => 21,
            ErrorKind::ActionFailed => 22,
            ErrorKind::NotAllBranchesCompleted => 31,
            ErrorKind::Timeout => 32,
            ErrorKind::TransactionManager => 41,
            ErrorKind::InvalidConfig => 51,
        }
    }
}

/// Numeric protocol error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const fn of(operation: Operation, kind: ErrorKind) -> Self {
        Self(operation.base() + kind.offset())
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Recover the operation and kind a code was built from
    pub fn decode(self) -> Option<(Operation, ErrorKind)> {
        let operation = Operation::ALL
            .into_iter()
            .find(|op| self.0 >= op.base() && self.0 < op.base() + 100)?;
        let kind = ErrorKind::ALL
            .into_iter()
            .find(|kind| operation.base() + kind.offset() == self.0)?;
        Some((operation, kind))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Named codes for the failures the protocol documents explicitly.
pub const TXN_BEGIN_FAILED_ROOT_ALREADY_EXISTS: ErrorCode =
    ErrorCode::of(Operation::Begin, ErrorKind::RootAlreadyActive);
pub const TXN_BEGIN_FAILED_TRANSACTION_MANAGER: ErrorCode =
    ErrorCode::of(Operation::Begin, ErrorKind::TransactionManager);
pub const TXN_JOIN_FAILED_ROOT_NOT_FOUND: ErrorCode =
    ErrorCode::of(Operation::Join, ErrorKind::RootNotFound);
pub const TXN_JOIN_FAILED_ROOT_STATE_ERROR: ErrorCode =
    ErrorCode::of(Operation::Join, ErrorKind::RootStateError);
pub const TXN_JOIN_FAILED_BRANCH_XID_ALREADY_EXISTS: ErrorCode =
    ErrorCode::of(Operation::Join, ErrorKind::BranchAlreadyExists);
pub const TXN_JOIN_FAILED_ACTION_NOT_REGISTERED: ErrorCode =
    ErrorCode::of(Operation::Join, ErrorKind::ActionNotRegistered);
pub const BRANCH_TXN_TRY_FAILED_ACTION_ERROR: ErrorCode =
    ErrorCode::of(Operation::Try, ErrorKind::ActionFailed);
pub const BRANCH_TXN_TRY_FAILED_BRANCH_TXN_STATE_ERROR: ErrorCode =
    ErrorCode::of(Operation::Try, ErrorKind::BranchStateError);
pub const BRANCH_TXN_CONFIRM_FAILED_CANNOT_FIND_BRANCH_TXN: ErrorCode =
    ErrorCode::of(Operation::Confirm, ErrorKind::BranchNotFound);
pub const BRANCH_TXN_CONFIRM_FAILED_BRANCH_TXN_STATE_ERROR: ErrorCode =
    ErrorCode::of(Operation::Confirm, ErrorKind::BranchStateError);
pub const BRANCH_TXN_CONFIRM_FAILED_ACTION_ERROR: ErrorCode =
    ErrorCode::of(Operation::Confirm, ErrorKind::ActionFailed);
pub const BRANCH_TXN_CANCEL_FAILED_CANNOT_FIND_BRANCH_TXN: ErrorCode =
    ErrorCode::of(Operation::Cancel, ErrorKind::BranchNotFound);
pub const BRANCH_TXN_CANCEL_FAILED_BRANCH_TXN_STATE_ERROR: ErrorCode =
    ErrorCode::of(Operation::Cancel, ErrorKind::BranchStateError);
pub const BRANCH_TXN_CANCEL_FAILED_ACTION_ERROR: ErrorCode =
    ErrorCode::of(Operation::Cancel, ErrorKind::ActionFailed);
pub const TXN_END_FAILED_ROOT_NOT_FOUND: ErrorCode =
    ErrorCode::of(Operation::End, ErrorKind::RootNotFound);
pub const TXN_END_FAILED_ROOT_STATE_ERROR: ErrorCode =
    ErrorCode::of(Operation::End, ErrorKind::RootStateError);
pub const TXN_END_FAILED_NOT_ALL_BRANCHES_COMPLETED: ErrorCode =
    ErrorCode::of(Operation::End, ErrorKind::NotAllBranchesCompleted);
pub const TXN_END_FAILED_TIME_OUT: ErrorCode = ErrorCode::of(Operation::End, ErrorKind::Timeout);
