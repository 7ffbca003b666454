//! Error types for reconciliation

use crate::client::{ClientError, ErrorKind, Method};
use thiserror::Error;

/// Reconciliation result type
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Classified failure kind surfaced to callers of `deploy` and `destroy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The caller is not authorized; never retried
    PermissionDenied,
    /// The target entity does not exist
    NotFound,
    /// Network, throttling or service failure that outlived the retry budget
    Transient,
    /// Desired state cannot be satisfied (e.g. an unowned policy reference is missing)
    Conflict,
    /// The desired-state input itself is malformed
    Invalid,
}

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// A remote call failed after the executor gave up on it
    #[error("{action} {entity} failed after {attempts} attempt(s) ({kind:?}): {source}")]
    Remote {
        action: Method,
        entity: String,
        kind: ErrorKind,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    /// A bare-name policy reference exists in neither policy class
    #[error("Policy {name} does not exist as a System or Custom policy")]
    UnresolvedPolicy { name: String },

    /// Desired-state configuration is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON configuration or state could not be parsed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Wrap a client error with the entity and action it was raised for
    pub fn remote(action: Method, entity: impl Into<String>, attempts: u32, source: ClientError) -> Self {
        ReconcileError::Remote {
            action,
            entity: entity.into(),
            kind: source.kind,
            attempts,
            source,
        }
    }

    /// Classified kind of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            ReconcileError::Remote { kind, .. } => match kind {
                ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
                ErrorKind::NotFound => FailureKind::NotFound,
                ErrorKind::Transient => FailureKind::Transient,
            },
            ReconcileError::UnresolvedPolicy { .. } => FailureKind::Conflict,
            ReconcileError::InvalidConfig(_)
            | ReconcileError::Io(_)
            | ReconcileError::Toml(_)
            | ReconcileError::Json(_) => FailureKind::Invalid,
        }
    }

    /// Whether the remote entity was absent
    pub fn is_not_found(&self) -> bool {
        self.kind() == FailureKind::NotFound
    }

    /// Number of attempts made before this error surfaced (0 for local errors)
    pub fn attempts(&self) -> u32 {
        match self {
            ReconcileError::Remote { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_reports_entity_and_action() {
        let err = ReconcileError::remote(
            Method::CreatePolicy,
            "fc-logs",
            1,
            ClientError::from_code("NoPermission", "denied"),
        );

        let message = err.to_string();
        assert!(message.contains("CreatePolicy"));
        assert!(message.contains("fc-logs"));
        assert!(message.contains("PermissionDenied"));
        assert_eq!(err.kind(), FailureKind::PermissionDenied);
        assert_eq!(err.attempts(), 1);
    }

    #[test]
    fn test_unresolved_policy_is_conflict() {
        let err = ReconcileError::UnresolvedPolicy {
            name: "missing".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Conflict);
        assert!(!err.is_not_found());
    }
}
