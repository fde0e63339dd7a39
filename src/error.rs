//! Error types for the OCM Agent Operator

use thiserror::Error;

use crate::resources::ResourceKind;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object store error
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// Desired object could not be built
    #[error("Failed to build {kind}: {message}")]
    Build { kind: ResourceKind, message: String },

    /// Changed was handed an object of the wrong kind
    #[error("Expected object of kind {expected} but received {actual}")]
    KindMismatch {
        expected: ResourceKind,
        actual: ResourceKind,
    },

    /// Built object carries no name
    #[error("Object {0} has no name")]
    MissingName(ResourceKind),

    /// Optimistic-concurrency retries ran out
    #[error("Gave up writing {kind} '{name}' after {attempts} conflicting attempts")]
    ConflictRetriesExhausted {
        kind: ResourceKind,
        name: String,
        attempts: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a build error for the given kind
    pub fn build(kind: ResourceKind, msg: impl Into<String>) -> Self {
        Error::Build {
            kind,
            message: msg.into(),
        }
    }

    /// Whether this error wraps an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(StoreError::Conflict(_)))
    }
}

/// Errors reported by an object store client
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Create collided with an existing object
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Write was based on a stale resource version
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other Kubernetes API failure
    #[error(transparent)]
    Kube(kube::Error),

    /// Any other backend failure
    #[error("{0}")]
    Backend(String),

    /// The invocation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The invocation ran past its deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists(ae.message)
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
            other => StoreError::Kube(other),
        }
    }
}
