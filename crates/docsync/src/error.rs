use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::document::ValidationError;
use crate::drafts::DraftStatus;
use crate::gateway::GatewayError;
use crate::secrets::SecretError;
use crate::workflow::WorkflowEvent;

/// Error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidSignature,
    Unreachable,
    ValidationError,
    PermissionDenied,
    Internal,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Cannot {event} a draft that is {status}")]
    InvalidTransition {
        status: DraftStatus,
        event: WorkflowEvent,
    },

    #[error("Draft '{draft_id}' is {status}, expected {expected}")]
    InvalidState {
        draft_id: String,
        status: DraftStatus,
        expected: DraftStatus,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Delivery '{0}' is still being processed")]
    DeliveryInFlight(String),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Repository error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Repository still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: GatewayError,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

impl SyncError {
    /// Maps the error onto the category reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::InvalidTransition { .. }
            | SyncError::InvalidState { .. }
            | SyncError::Conflict(_)
            | SyncError::DeliveryInFlight(_) => ErrorKind::Conflict,
            SyncError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SyncError::InvalidSignature(_) => ErrorKind::InvalidSignature,
            SyncError::Validation(_) | SyncError::Payload(_) => ErrorKind::ValidationError,
            SyncError::Gateway(e) | SyncError::RetriesExhausted { source: e, .. } => {
                gateway_kind(e)
            }
            SyncError::Database(_) | SyncError::Config(_) | SyncError::Secret(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True if retrying the same call with fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Gateway(e) => e.is_retryable(),
            SyncError::DeliveryInFlight(_) => true,
            _ => false,
        }
    }
}

fn gateway_kind(error: &GatewayError) -> ErrorKind {
    match error {
        GatewayError::NotFound { .. } | GatewayError::UnknownRevision(_) => ErrorKind::NotFound,
        GatewayError::Conflict { .. } => ErrorKind::Conflict,
        GatewayError::Unreachable(_) | GatewayError::Timeout(_) => ErrorKind::Unreachable,
        GatewayError::EmptyChangeSet(_) => ErrorKind::ValidationError,
        GatewayError::Operation(_) => ErrorKind::Internal,
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_errors_are_conflicts() {
        let err = SyncError::InvalidTransition {
            status: DraftStatus::Published,
            event: WorkflowEvent::Submit,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "Cannot submit a draft that is published");

        let err = SyncError::InvalidState {
            draft_id: "d1".into(),
            status: DraftStatus::Draft,
            expected: DraftStatus::Approved,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_gateway_kinds() {
        let conflict = SyncError::from(GatewayError::Conflict {
            branch: "main".into(),
            expected: "r0".into(),
            actual: "r1".into(),
        });
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let down = SyncError::from(GatewayError::Timeout(500));
        assert_eq!(down.kind(), ErrorKind::Unreachable);
        assert!(down.is_retryable());

        let exhausted = SyncError::RetriesExhausted {
            attempts: 3,
            source: GatewayError::Unreachable("down".into()),
        };
        assert_eq!(exhausted.kind(), ErrorKind::Unreachable);
        assert!(!exhausted.is_retryable());

        let missing = SyncError::from(GatewayError::UnknownRevision("zz".into()));
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_in_flight_delivery_is_retryable() {
        let err = SyncError::DeliveryInFlight("d-1".into());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_kind() {
        let err = SyncError::from(ValidationError::EmptyPath);
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
