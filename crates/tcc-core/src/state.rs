//! Lifecycle states and pure transition rules
//!
//! Effect-free decisions for branch and root transitions. The coordinator
//! applies these under the owning lock and performs all I/O itself.
//!
//! ## Branch lifecycle
//!
//! ```text
//! Registered ──try──▶ Tried ──▶ Confirming ──▶ Confirmed
//!      │                 └────▶ Cancelling ──▶ Cancelled
//!      └──cancel (null compensation)────────▶ Cancelled
//! any non-terminal ──conflicting request──▶ Failed
//! ```

use crate::types::Outcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single branch transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchState {
    /// Joined the root, Try not yet succeeded
    Registered,
    /// Try succeeded; waiting for the global outcome
    Tried,
    /// Confirm requested; retried until it succeeds
    Confirming,
    /// Confirm action succeeded
    Confirmed,
    /// Cancel requested; retried until it succeeds
    Cancelling,
    /// Cancel action succeeded, or the branch was never tried
    Cancelled,
    /// A request conflicted with the branch state
    Failed,
}

impl BranchState {
    /// Terminal states are never left
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BranchState::Confirmed | BranchState::Cancelled | BranchState::Failed
        )
    }

    /// In-progress state entered when `outcome` is requested
    pub fn in_progress(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Confirm => BranchState::Confirming,
            Outcome::Cancel => BranchState::Cancelling,
        }
    }

    /// Terminal state reached when `outcome` succeeds
    pub fn completed(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Confirm => BranchState::Confirmed,
            Outcome::Cancel => BranchState::Cancelled,
        }
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State of a root (global) transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RootState {
    /// Accepting branches
    Active,
    /// End(Confirm) fanning out
    Confirming,
    /// End(Cancel) fanning out
    Cancelling,
    /// Every branch confirmed
    Confirmed,
    /// Every branch cancelled
    Cancelled,
    /// An End attempt hit its deadline; End may be retried with the same outcome
    TimedOut,
}

impl RootState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RootState::Confirmed | RootState::Cancelled)
    }

    pub fn in_progress(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Confirm => RootState::Confirming,
            Outcome::Cancel => RootState::Cancelling,
        }
    }

    pub fn completed(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Confirm => RootState::Confirmed,
            Outcome::Cancel => RootState::Cancelled,
        }
    }
}

impl fmt::Display for RootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a branch must do when a Confirm or Cancel is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDecision {
    /// Enter (or stay in) the in-progress state and run the guarded action
    Run { from: BranchState },
    /// The requested terminal state was already reached
    AlreadyDone,
    /// Cancel of a branch whose Try never succeeded: go straight to Cancelled
    NullCompensation,
    /// Request conflicts with the current state.
    ///
    /// `mark_failed` is false when the branch is already terminal and must not move.
    Conflict { mark_failed: bool },
}

/// Decide how a branch in `state` reacts to a request for `outcome`.
pub fn decide_phase(state: BranchState, outcome: Outcome) -> PhaseDecision {
    use BranchState::*;

    match (state, outcome) {
        (Tried, _) => PhaseDecision::Run { from: state },
        (Confirming, Outcome::Confirm) | (Cancelling, Outcome::Cancel) => {
            PhaseDecision::Run { from: state }
        }
        (Confirmed, Outcome::Confirm) | (Cancelled, Outcome::Cancel) => PhaseDecision::AlreadyDone,
        (Registered, Outcome::Cancel) => PhaseDecision::NullCompensation,
        (Registered, Outcome::Confirm)
        | (Confirming, Outcome::Cancel)
        | (Cancelling, Outcome::Confirm) => PhaseDecision::Conflict { mark_failed: true },
        (Confirmed, Outcome::Cancel) | (Cancelled, Outcome::Confirm) | (Failed, _) => {
            PhaseDecision::Conflict { mark_failed: false }
        }
    }
}

/// What a root must do when End is requested with `outcome`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndDecision {
    /// Fan the phase out to branches
    FanOut,
    /// Root already reached the requested terminal state
    AlreadyDone,
    /// Root is committed to the other outcome (or cannot end)
    Conflict,
}

/// Decide how a root reacts to End.
///
/// `committed` is the outcome recorded by an earlier End attempt, if any.
pub fn decide_end(state: RootState, committed: Option<Outcome>, outcome: Outcome) -> EndDecision {
    match (state, committed) {
        (RootState::Active, _) => EndDecision::FanOut,
        (_, Some(previous)) if previous != outcome => EndDecision::Conflict,
        (RootState::Confirmed, _) | (RootState::Cancelled, _) => EndDecision::AlreadyDone,
        (RootState::Confirming, _) | (RootState::Cancelling, _) | (RootState::TimedOut, _) => {
            EndDecision::FanOut
        }
    }
}
