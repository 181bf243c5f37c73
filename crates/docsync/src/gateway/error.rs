//! Repository gateway error types.

use thiserror::Error;

/// Errors returned by a [`RepositoryGateway`](super::RepositoryGateway).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Path '{path}' not found at '{reference}'")]
    NotFound { path: String, reference: String },

    #[error("Unknown revision or branch: {0}")]
    UnknownRevision(String),

    #[error("Branch '{branch}' moved: expected head {expected}, found {actual}")]
    Conflict {
        branch: String,
        expected: String,
        actual: String,
    },

    #[error("Repository unreachable: {0}")]
    Unreachable(String),

    #[error("Repository operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Empty change set for branch '{0}'")]
    EmptyChangeSet(String),

    #[error("Repository operation failed: {0}")]
    Operation(String),
}

impl GatewayError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unreachable(_) | GatewayError::Timeout(_)
        )
    }

    /// Returns true for transport failures: the operation may or may not have
    /// reached the store.
    pub fn is_transport(&self) -> bool {
        self.is_retryable()
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GatewayError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("the remote end hung up unexpectedly")
        || lower.contains("no space left on device")
        || lower.contains("input/output error")
    {
        return GatewayError::Unreachable(stderr.trim().to_string());
    }

    if lower.contains("unknown revision")
        || lower.contains("bad revision")
        || lower.contains("needed a single revision")
        || lower.contains("not a valid object name")
        || lower.contains("invalid object name")
    {
        return GatewayError::UnknownRevision(stderr.trim().to_string());
    }

    GatewayError::Operation(stderr.trim().to_string())
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
