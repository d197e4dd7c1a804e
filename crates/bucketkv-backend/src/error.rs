use bucketkv_store::StoreError;
use thiserror::Error;

/// Errors returned by backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// A required setting (bucket, root path, endpoint) is missing.
    /// Raised before any request reaches the store.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A credential is missing or empty. Only raised at construction.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The object store rejected or failed a request.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A listed object is not a JSON object (strict aggregation only).
    #[error("cannot decode {key} as a JSON object: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    /// The merged tree could not be encoded.
    #[error("cannot encode merged tree: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl BackendError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// `true` when an object body did not match its declared size.
    pub fn is_size_mismatch(&self) -> bool {
        matches!(self, Self::Store(StoreError::SizeMismatch { .. }))
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported inside a watch subscription.
///
/// Apart from [`WatchError::Configuration`], these never end the
/// subscription.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WatchError {
    /// The subscription could not start; it is closed after this event.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The notification feed reported an error.
    #[error("notification error: {0}")]
    Notification(String),

    /// Re-reading a changed object failed.
    #[error("cannot fetch {key}: {reason}")]
    Fetch { key: String, reason: String },
}
