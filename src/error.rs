//! Orchestration errors that drive control flow
//!
//! These are the faults callers and tests branch on; everything else is
//! carried as `anyhow` context.

use thiserror::Error;

/// Errors raised by the orchestrator itself.
#[derive(Debug, Error)]
pub enum CavalierError {
    /// A destructive or mutating operation targeted an instance that does
    /// not carry the ownership tag. Always fatal, never retried.
    #[error("the DB instance '{identifier}' wasn't created by the cavalier")]
    NotCreatedByCavalier { identifier: String },

    /// No snapshot with the deterministic name links back to the instance.
    #[error("no DB snapshot created by the cavalier corresponds to '{identifier}'")]
    NoLinkedSnapshot { identifier: String },

    /// The caller's cancellation signal fired outside a wait.
    #[error("the operation was cancelled")]
    Cancelled,
}
