//! Error types for the governance engine
//!
//! Every variant maps to one HTTP-equivalent class at the route boundary;
//! the engine itself never speaks HTTP. A failed guarded write is always
//! `Conflict`, never a silent success.

use thiserror::Error;

/// Governance engine errors
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Caller is authenticated but lacks the required capability (403).
    /// Not retryable. The reason never names the permission-table entry,
    /// only "insufficient permission" plus the caller's role.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown scriptId / requestId / version (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A guarded transition's precondition no longer holds (409): the
    /// request is already terminal or the version number is taken.
    /// Retryable only after a fresh read; the message carries expected vs.
    /// actual state so the caller can decide.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Structurally invalid call, e.g. reject without a comment (400).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transport or backing-store failure (500). Retryable by the caller
    /// with backoff; the engine itself never retries.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl GovernanceError {
    /// Whether a retry after a fresh read can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GovernanceError::Conflict(_) | GovernanceError::StoreUnavailable(_)
        )
    }
}

/// Result type for governance operations
pub type Result<T> = std::result::Result<T, GovernanceError>;
