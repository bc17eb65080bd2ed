//! Error types for the devarch control plane.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! map one-to-one onto the outcomes the API surface distinguishes: missing
//! resources, rejected input, conflicts (duplicate names, stale plans,
//! concurrent applies), broken invariants, runtime failures, and store
//! failures.

use thiserror::Error;

/// Result type for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for all control-plane operations
#[derive(Error, Debug)]
pub enum Error {
    /// A stack, instance, template, or config file does not exist
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind ("stack", "instance", "template", "config file")
        kind: &'static str,
        /// The identifier that was looked up
        name: String,
    },

    /// Input rejected by a validation rule
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong, including the offending input
        message: String,
    },

    /// A unique-name constraint was violated
    #[error("{kind} already exists: {name}")]
    Duplicate {
        /// Resource kind that collided
        kind: &'static str,
        /// The name that already exists
        name: String,
    },

    /// The client-supplied plan token no longer matches the stored state
    #[error("stale plan token for stack '{stack}': state changed since the plan was generated")]
    StalePlan {
        /// Stack whose token was revalidated
        stack: String,
    },

    /// The per-stack apply lock is held by another session
    #[error("stack '{stack}' is being applied by another session")]
    ConcurrentApply {
        /// Stack whose lock could not be acquired
        stack: String,
    },

    /// Stored state violates a structural invariant
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant
        message: String,
    },

    /// A container runtime call failed
    #[error("runtime failure during {operation}: {output}")]
    RuntimeFailure {
        /// The runtime operation that failed
        operation: String,
        /// Concatenated stdout and stderr from the runtime
        output: String,
    },

    /// The container runtime binary was not found on this host
    #[error("container runtime binary not found in PATH")]
    RuntimeNotFound,

    /// Relational store error outside the taxonomy above
    #[error("store error: {source}")]
    Store {
        /// The underlying database error
        #[from]
        source: sqlx::Error,
    },

    /// IO error during filesystem work (materialization, manifest staging)
    #[error("IO error during {operation}: {source}")]
    Io {
        /// The operation that caused the IO error
        operation: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error while rendering a manifest
    #[error("manifest serialization failed: {source}")]
    Yaml {
        /// The underlying serializer error
        #[from]
        source: serde_yaml::Error,
    },
}

impl Error {
    /// Create a new not-found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new duplicate-name error
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            name: name.into(),
        }
    }

    /// Create a new stale-plan error
    pub fn stale_plan(stack: impl Into<String>) -> Self {
        Self::StalePlan {
            stack: stack.into(),
        }
    }

    /// Create a new concurrent-apply error
    pub fn concurrent_apply(stack: impl Into<String>) -> Self {
        Self::ConcurrentApply {
            stack: stack.into(),
        }
    }

    /// Create a new invariant-violation error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a new runtime-failure error
    pub fn runtime(operation: impl Into<String>, output: impl Into<String>) -> Self {
        Self::RuntimeFailure {
            operation: operation.into(),
            output: output.into(),
        }
    }

    /// Create a new IO error with context
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether this error is a conflict the client can resolve by retrying
    /// (after a re-plan for stale tokens, after a backoff for lock contention)
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Duplicate { .. } | Self::StalePlan { .. } | Self::ConcurrentApply { .. }
        )
    }

    /// Get the error category for grouping and handling
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation",
            Self::Duplicate { .. } => "duplicate",
            Self::StalePlan { .. } => "stale_plan",
            Self::ConcurrentApply { .. } => "concurrent_apply",
            Self::InvariantViolation { .. } => "invariant",
            Self::RuntimeFailure { .. } | Self::RuntimeNotFound => "runtime",
            Self::Store { .. } => "store",
            Self::Io { .. } => "io",
            Self::Yaml { .. } => "yaml",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::not_found("stack", "web");
        assert_eq!(err.category(), "not_found");
        assert_eq!(err.to_string(), "stack not found: web");
    }

    #[test]
    fn test_conflict_classification() {
        assert!(Error::stale_plan("web").is_conflict());
        assert!(Error::concurrent_apply("web").is_conflict());
        assert!(Error::duplicate("stack", "web").is_conflict());
        assert!(!Error::validation("bad name").is_conflict());
        assert!(!Error::not_found("stack", "web").is_conflict());
    }

    #[test]
    fn test_stale_plan_message_mentions_stale() {
        let err = Error::stale_plan("web");
        assert!(err.to_string().contains("stale"));
    }

    #[test]
    fn test_concurrent_apply_message() {
        let err = Error::concurrent_apply("web");
        assert!(err.to_string().contains("being applied by another session"));
    }

    #[test]
    fn test_runtime_failure_carries_output() {
        let err = Error::runtime("compose up", "exit status 1\nno such image");
        assert_eq!(err.category(), "runtime");
        assert!(err.to_string().contains("no such image"));
    }
}
