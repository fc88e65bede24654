#![deny(clippy::await_holding_lock)]
//! # TCC Guards - Idempotent Execution
//!
//! The guard every branch wraps its Confirm and Cancel actions in, so the
//! coordinator can retry End as often as needed without duplicating side
//! effects.

/// At-most-once-success guard
pub mod idempotent;

pub use idempotent::{GuardOutcome, IdempotentGuard};
