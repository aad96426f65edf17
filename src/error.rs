//! Error types for the Stratum provisioning engine.
//!
//! This module provides the error hierarchy for every stage of a deployment
//! run: configuration, dependency planning, remote provisioning, the control
//! plane client and state persistence.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::planner::ResourceType;

/// The main error type for the Stratum provisioning engine.
#[derive(Debug, Error)]
pub enum StratumError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}. Outputs may not be durably recorded; re-run the operation")]
    State(#[from] StateError),

    /// A single adapter failed to apply or remove its resource.
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Remote control plane errors.
    #[error("Control plane error: {0}")]
    Cloud(#[from] CloudError),

    /// Best-effort teardown finished with one or more failed removals.
    #[error("Teardown incomplete: {} resource(s) could not be removed ({})", failures.len(), summarize(failures))]
    TeardownFailed {
        /// Every removal that failed, in the order they were attempted.
        failures: Vec<ProvisionError>,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The permission intent has an unsupported shape.
    #[error("Malformed permissions: {message}")]
    MalformedPermissions {
        /// Description of the problem.
        message: String,
    },

    /// Two instances share a name.
    #[error("Duplicate instance name: {name}")]
    DuplicateInstance {
        /// The duplicated name.
        name: String,
    },

    /// An instance references an instance that is not declared.
    #[error("Instance '{instance}' references unknown instance '{target}'")]
    UnknownReference {
        /// The referencing instance.
        instance: String,
        /// The missing target.
        target: String,
    },

    /// Circular dependency detected.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// Description of the cycle.
        cycle: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Writing the state record failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The lock this run held was released or taken over while it ran.
    #[error("State lock {lock_id} is no longer held by this run")]
    LockLost {
        /// Identifier of the lost lock.
        lock_id: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Which adapter operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOperation {
    /// Creating or updating a resource.
    Apply,
    /// Deleting a resource.
    Remove,
}

/// A failed adapter call, identifying the instance and the underlying cause.
#[derive(Debug, Clone, Error)]
#[error("failed to {operation} {resource_type} '{instance}': {cause}")]
pub struct ProvisionError {
    /// The operation that failed.
    pub operation: ProvisionOperation,
    /// Type of the resource.
    pub resource_type: ResourceType,
    /// Logical instance name.
    pub instance: String,
    /// Underlying cause.
    pub cause: String,
}

/// Remote control plane errors.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Authentication failed.
    #[error("Control plane authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("Control plane request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("Control plane rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Resource not found.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// Network error.
    #[error("Network error communicating with the control plane: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from the control plane: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A reference could not be resolved from the outputs produced so far.
    #[error("Instance '{instance}' needs output '{field}' of '{target}', which is not available")]
    MissingOutput {
        /// The instance being applied.
        instance: String,
        /// The referenced instance.
        target: String,
        /// The referenced output field.
        field: String,
    },

    /// No adapter is registered for a resource type.
    #[error("No adapter registered for resource type {resource_type}")]
    MissingAdapter {
        /// The resource type without an adapter.
        resource_type: ResourceType,
    },
}

/// Result type alias for Stratum operations.
pub type Result<T> = std::result::Result<T, StratumError>;

fn summarize(failures: &[ProvisionError]) -> String {
    failures
        .iter()
        .map(|f| f.instance.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StratumError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Cloud(err) => err.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns true if the error means the remote resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Cloud(CloudError::NotFound { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a version mismatch error for a record written as `found`.
    #[must_use]
    pub fn version_mismatch(expected: &str, found: &str) -> Self {
        Self::VersionMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProvisionError {
    /// Creates an apply failure.
    #[must_use]
    pub fn apply(resource_type: ResourceType, instance: &str, cause: impl fmt::Display) -> Self {
        Self {
            operation: ProvisionOperation::Apply,
            resource_type,
            instance: instance.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Creates a removal failure.
    #[must_use]
    pub fn remove(resource_type: ResourceType, instance: &str, cause: impl fmt::Display) -> Self {
        Self {
            operation: ProvisionOperation::Remove,
            resource_type,
            instance: instance.to_string(),
            cause: cause.to_string(),
        }
    }
}

impl CloudError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true for transient failures worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NetworkError { .. })
            || matches!(self, Self::ApiRequestFailed { status, .. } if *status >= 500)
    }

    /// Returns the wait the control plane asked for before the next attempt.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_error_names_instance() {
        let err = ProvisionError::apply(ResourceType::Function, "function", "boom");
        assert_eq!(err.to_string(), "failed to apply function 'function': boom");
    }

    #[test]
    fn test_teardown_lists_failed_instances() {
        let err = StratumError::TeardownFailed {
            failures: vec![
                ProvisionError::remove(ResourceType::Bucket, "bucket", "denied"),
                ProvisionError::remove(ResourceType::Table, "table", "denied"),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("2 resource(s)"));
        assert!(message.contains("bucket, table"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(StratumError::Cloud(CloudError::network("reset")).is_retryable());
        assert!(StratumError::Cloud(CloudError::api_error(503, "unavailable")).is_retryable());
        assert!(!StratumError::Cloud(CloudError::api_error(400, "bad")).is_retryable());
        assert!(StratumError::State(StateError::LockFailed { message: String::from("busy") }).is_retryable());
        assert!(!StratumError::State(StateError::LockLost { lock_id: String::from("l") }).is_retryable());
        assert_eq!(
            CloudError::RateLimited { retry_after_secs: 7 }.retry_after(),
            Some(Duration::from_secs(7))
        );
        assert_eq!(CloudError::network("reset").retry_after(), None);
    }
}
