//! # Error Taxonomy
//!
//! Typed errors surfaced at the orchestrator boundary. Per-agent failures
//! never appear here - they are absorbed into `failed`/`partial` section
//! results so a run can always proceed with the remaining agents.

use thiserror::Error;

/// Errors surfaced by the orchestrators.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed persona/company input. Fails fast, no partial work.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Optimistic version check failed even after the single merge-retry.
    #[error("version conflict: expected {expected}, repository holds {latest}")]
    VersionConflict { expected: u64, latest: u64 },

    /// The run was stopped before the join point. Nothing was persisted;
    /// the prior report stays authoritative.
    #[error("research run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_display() {
        let err = CoreError::InvalidRequest("company name is empty".to_string());
        assert!(err.to_string().contains("company name is empty"));
    }

    #[test]
    fn test_version_conflict_display() {
        let err = CoreError::VersionConflict {
            expected: 3,
            latest: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("holds 5"));
    }
}
