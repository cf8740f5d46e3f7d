//! Error types for engine operations.
//!
//! Errors are categorized so callers can distinguish mistakes in the
//! declared program from failures reported by the cloud provider. All of
//! them abort the run; transient API errors are retried inside the
//! provider SDK and never surface here as a distinct variant.

use thiserror::Error;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The provider rejected a create/update/delete call
    Provider,
    /// A referenced entity could not be resolved (e.g. an unknown user)
    Lookup,
    /// The declared program is malformed (duplicates, cycles, bad handles)
    Config,
    /// Inputs or outputs failed to (de)serialize into the expected shape
    Value,
    /// Persisted state could not be read or written
    State,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Provider => "Provider rejected the operation",
            Self::Lookup => "Lookup failed",
            Self::Config => "Program configuration error",
            Self::Value => "Value shape mismatch",
            Self::State => "State persistence error",
        }
    }

    /// Whether the fix lives in the declared program rather than the cloud.
    pub fn is_program_error(&self) -> bool {
        matches!(self, Self::Config | Self::Value)
    }
}

/// Errors that can occur while planning or executing a stack.
#[derive(Debug, Error)]
pub enum Error {
    /// The provider rejected an operation; the message is passed through verbatim
    #[error("provider rejected {urn}: {message}")]
    Provider {
        /// URN of the resource being applied
        urn: String,
        /// Provider error message, unmodified
        message: String,
    },

    /// A lookup against the provider found nothing
    #[error("lookup failed for {what}: {message}")]
    Lookup {
        /// What was being resolved (e.g. a username)
        what: String,
        /// Why the resolution failed
        message: String,
    },

    /// Two resources were registered under the same URN
    #[error("duplicate resource: {urn}")]
    DuplicateResource { urn: String },

    /// The dependency graph contains a cycle
    #[error("dependency cycle involving {urn}")]
    Cycle { urn: String },

    /// A dependency handle does not belong to this stack
    #[error("unknown dependency handle {index} referenced by {urn}")]
    UnknownDependency { urn: String, index: usize },

    /// An input or output did not match the expected shape
    #[error("value error for {context}: {source}")]
    Value {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A transformation registered on an output failed
    #[error("apply failed for {context}: {source}")]
    Apply {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// State file IO failure
    #[error("state error for {path}: {source}")]
    State {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// State file parse failure
    #[error("state parse error for {path}: {source}")]
    StateFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Categorize this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::Lookup { .. } => ErrorCategory::Lookup,
            Self::DuplicateResource { .. } | Self::Cycle { .. } | Self::UnknownDependency { .. } => {
                ErrorCategory::Config
            }
            Self::Value { .. } | Self::Apply { .. } => ErrorCategory::Value,
            Self::State { .. } | Self::StateFormat { .. } => ErrorCategory::State,
        }
    }

    /// Build a provider rejection, keeping the provider's message verbatim.
    pub fn provider(urn: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            urn: urn.into(),
            message: message.into(),
        }
    }

    /// Build a lookup failure.
    pub fn lookup(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lookup {
            what: what.into(),
            message: message.into(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        let err = Error::provider("urn:a", "quota exceeded");
        assert_eq!(err.category(), ErrorCategory::Provider);
        assert!(!err.category().is_program_error());

        let err = Error::DuplicateResource { urn: "urn:a".into() };
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(err.category().is_program_error());
    }

    #[test]
    fn test_provider_message_is_verbatim() {
        let err = Error::provider("urn:acct", "EMAIL_ALREADY_EXISTS: nope");
        assert_eq!(
            err.to_string(),
            "provider rejected urn:acct: EMAIL_ALREADY_EXISTS: nope"
        );
    }
}
