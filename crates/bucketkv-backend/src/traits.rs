use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::BackendResult;
use crate::types::{ChangeReceiver, KvPair};

/// A key/value configuration backend.
///
/// Lets a configuration layer hold any backend behind one interface.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Merge every JSON object under `prefix` into one tree, keyed by
    /// logical key, and return it encoded as JSON.
    async fn get(&self, prefix: &str) -> BackendResult<Bytes>;

    /// Every object under `prefix` with its storage key and raw body.
    async fn list(&self, prefix: &str) -> BackendResult<Vec<KvPair>>;

    /// Store `value` under `key` exactly as given.
    async fn set(&self, key: &str, value: Bytes) -> BackendResult<()>;

    /// Subscribe to changes of objects whose storage key starts with `key`.
    /// Returns immediately; see [`crate::watch::Watcher::watch`].
    fn watch(&self, key: &str, cancel: CancellationToken) -> ChangeReceiver;
}
