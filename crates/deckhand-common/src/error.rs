//! Error types for deckhand
//!
//! The taxonomy mirrors how callers react to a failure:
//! - `Input` errors are raised before any upstream call and are never retried
//! - `Upstream` errors come from the control plane, chart installer or
//!   identity provider
//! - `NotFound` and `CredentialDecode` only surface from vault reads

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for deckhand operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed request: bad name, missing field, unrecognized or unbuildable source
    #[error("invalid input: {message}")]
    Input {
        /// Description of what's invalid
        message: String,
        /// The offending field (e.g., "name", "services.web.ports")
        field: Option<String>,
    },

    /// A downstream system rejected or failed a call
    #[error("upstream error [{operation}]: {message}")]
    Upstream {
        /// The operation that failed (e.g., "declare Deployment/web")
        operation: String,
        /// Upstream error message, passed through verbatim
        message: String,
        /// Whether the call hit the configured timeout
        timed_out: bool,
    },

    /// A named object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind or record type
        kind: String,
        /// Object name
        name: String,
    },

    /// A stored credential record could not be fully decoded
    #[error("credential record '{record}' is malformed: {message}")]
    CredentialDecode {
        /// Name of the malformed record
        record: String,
        /// Description of what failed to decode
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Invalid deployer configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },
}

impl Error {
    /// Create an input error with the given message
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input {
            message: msg.into(),
            field: None,
        }
    }

    /// Create an input error pointing at a specific field
    pub fn input_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Input {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an upstream error for an operation
    pub fn upstream(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: msg.into(),
            timed_out: false,
        }
    }

    /// Create an upstream error for an operation that exceeded its deadline
    pub fn upstream_timeout(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: format!("timed out after {}s", timeout_secs),
            timed_out: true,
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a credential decode error naming the malformed record
    pub fn credential_decode(record: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CredentialDecode {
            record: record.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// True for errors caused by the request itself
    pub fn is_input(&self) -> bool {
        matches!(self, Error::Input { .. })
    }

    /// True when the error came from a call that exceeded its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Upstream { timed_out: true, .. })
    }

    /// The field an input error points at, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Input { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
