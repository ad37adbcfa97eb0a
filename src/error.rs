//! Error types for the bucket operator

use thiserror::Error;

/// Main error type for bucket operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cloud provider error (list or create failed)
    #[error("cloud provider error: {0}")]
    Cloud(String),

    /// Validation error for resource specs or generated names
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Create a cloud provider error with the given message
    pub fn cloud(msg: impl Into<String>) -> Self {
        Self::Cloud(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Returns true if the store reported that the record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Returns true if a write targeted a stale resource version (or a name already taken)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// Check if the next scheduled pass can be expected to clear this error
    ///
    /// Conflicts and cloud failures clear once the pass re-reads fresh state.
    /// Validation errors need a spec or configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409 || !(400..500).contains(&ae.code),
            Error::Kube(_) => true,
            Error::Cloud(_) => true,
            Error::Validation(_) => false,
        }
    }
}
