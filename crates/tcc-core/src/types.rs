//! Identifiers and outcome types shared by every TCC layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique identifier for a root (global) transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootId(pub Uuid);

impl RootId {
    /// Create a fresh random root id
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root:{}", &self.0.simple().to_string()[..12])
    }
}

/// Identifier of a branch transaction, unique within its root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub Uuid);

impl BranchId {
    /// Create a fresh random branch id
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch:{}", &self.0.simple().to_string()[..12])
    }
}

/// Logical scope a caller begins root transactions in.
///
/// At most one non-terminal root may exist per scope at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScopeKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Global outcome requested when ending a root transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Confirm,
    Cancel,
}

impl Outcome {
    /// The opposite outcome
    pub fn opposite(self) -> Self {
        match self {
            Outcome::Confirm => Outcome::Cancel,
            Outcome::Cancel => Outcome::Confirm,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Confirm => f.write_str("confirm"),
            Outcome::Cancel => f.write_str("cancel"),
        }
    }
}

/// Successful result of an idempotent operation.
///
/// Callers branch on this instead of inspecting log or error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completion {
    /// The operation ran and succeeded during this call
    Completed,
    /// A previous call already succeeded; nothing was executed
    AlreadyCompleted,
}

impl Completion {
    pub fn is_no_op(self) -> bool {
        matches!(self, Completion::AlreadyCompleted)
    }
}
