use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;
use crate::object::{EventClass, NotificationStream, ObjectInfoStream, ObjectReader};

/// Client for an S3-compatible object store.
///
/// Implementations must be safe to share across tasks: every call is
/// independent and the handle holds no per-call state.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// List objects whose key starts with `prefix` (plain string prefix).
    ///
    /// With `recursive` set the listing is flat. Without it, only direct
    /// children are returned together with one entry per common prefix.
    fn list_objects(&self, bucket: &str, prefix: &str, recursive: bool) -> ObjectInfoStream;

    /// Open an object for reading.
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectReader>;

    /// Store `data` under `key`, replacing any existing object.
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<()>;

    /// Subscribe to change notifications for `bucket`.
    ///
    /// Only records whose key starts with `prefix`, ends with `suffix` and
    /// whose event belongs to one of `classes` are delivered. The stream ends
    /// when `cancel` fires or the client shuts down.
    ///
    /// Whether changes made between this call and the first poll of the
    /// stream are delivered depends on the implementation.
    fn listen_bucket_notification(
        &self,
        bucket: &str,
        prefix: &str,
        suffix: &str,
        classes: &[EventClass],
        cancel: CancellationToken,
    ) -> NotificationStream;
}
