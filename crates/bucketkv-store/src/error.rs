/// Errors from object store client operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named bucket does not exist.
    #[error("bucket not found: {0}")]
    NoSuchBucket(String),

    /// The requested object was not found.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The bytes read from an object differ from its declared size.
    #[error("size mismatch for {key}: declared {expected} bytes, read {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The endpoint address cannot be used to reach a store.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    /// The key cannot be represented by the backing store.
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// The notification feed reported a failure.
    #[error("notification error: {0}")]
    Notification(String),

    /// The subscriber fell behind and notifications were dropped.
    #[error("notification stream lagged, {0} notifications dropped")]
    NotificationLagged(u64),

    /// Failure reported by the S3 client library.
    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),

    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for object store client operations.
pub type StoreResult<T> = Result<T, StoreError>;
