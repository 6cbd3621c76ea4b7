//! Common error types for the Corral runtime.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CorralError`].
pub type CorralResult<T> = Result<T, CorralError>;

/// Boxed cause carried by configuration failures.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the Corral runtime.
#[derive(Error, Diagnostic, Debug)]
pub enum CorralError {
    /// Malformed or contradictory container specification.
    #[error("Invalid container configuration: {message}")]
    #[diagnostic(code(corral::validation))]
    Validation {
        /// What is wrong with the input.
        message: String,
    },

    /// A container with this ID already exists in the runtime root.
    #[error("Container already exists: {id}")]
    #[diagnostic(
        code(corral::container::exists),
        help("Delete the existing container first or choose another ID")
    )]
    AlreadyExists {
        /// The conflicting container ID.
        id: String,
    },

    /// No container with this ID exists in the runtime root.
    #[error("Container does not exist: {id}")]
    #[diagnostic(code(corral::container::not_exist))]
    NotExist {
        /// The container ID that was not found.
        id: String,
    },

    /// Invalid container ID format.
    #[error("Invalid container ID: {id:?}")]
    #[diagnostic(
        code(corral::container::invalid_id),
        help("Container IDs must match [a-z][a-z0-9_-]+")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// The isolation engine rejected a configuration item, or the runtime
    /// could not derive one.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(corral::config))]
    Configuration {
        /// The error message.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxedSource>,
    },

    /// A mount or path would escape the container root.
    #[error("Security violation: {message}")]
    #[diagnostic(
        code(corral::security),
        help("The container root filesystem contains a symlink pointing outside of it")
    )]
    Security {
        /// Description of the violation.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Timeout while waiting for {operation}")]
    #[diagnostic(
        code(corral::timeout),
        help("Run `delete --force` to reclaim the partially created container")
    )]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// A seccomp policy cannot be expressed in the engine's profile grammar.
    #[error("Unsupported seccomp policy: {message}")]
    #[diagnostic(code(corral::seccomp::unsupported))]
    UnsupportedPolicy {
        /// Description of the unsupported policy.
        message: String,
    },

    /// The container is not in the state an operation requires.
    #[error("Container {id} is {actual}, expected {expected}")]
    #[diagnostic(code(corral::container::invalid_state))]
    InvalidState {
        /// The container ID.
        id: String,
        /// The required state.
        expected: String,
        /// The observed state.
        actual: String,
    },

    /// The start handshake peer sent an unexpected payload.
    #[error("Synchronization protocol error: {message}")]
    #[diagnostic(code(corral::sync::protocol))]
    Protocol {
        /// Description of the mismatch.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(corral::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(corral::serialization))]
    Serialization(String),

    /// Feature not supported on this host.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(corral::unsupported),
        help("A cgroup v2 unified hierarchy and Linux 5.3 or later are required")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(corral::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl CorralError {
    /// Shorthand for a [`CorralError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`CorralError::Configuration`] without a cause.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// A [`CorralError::Configuration`] that keeps `source` in the cause chain.
    pub fn configuration_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true for errors meaning "nothing there", which delete treats as success.
    #[must_use]
    pub fn is_not_exist(&self) -> bool {
        match self {
            Self::NotExist { .. } => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CorralError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn error_display() {
        let err = CorralError::NotExist {
            id: "abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Container does not exist: abc123");

        let err = CorralError::InvalidState {
            id: "web".to_string(),
            expected: "created".to_string(),
            actual: "stopped".to_string(),
        };
        assert_eq!(err.to_string(), "Container web is stopped, expected created");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CorralError = io_err.into();
        assert!(matches!(err, CorralError::Io(_)));
        assert!(err.is_not_exist());
    }

    #[test]
    fn configuration_keeps_cause() {
        let cause = std::io::Error::other("key rejected");
        let err = CorralError::configuration_with("lxc.uts.name", cause);
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("key rejected"));
    }
}
