//! S3 client built on the `object_store` crate.
//!
//! `object_store` binds one bucket per store handle, so handles are built
//! lazily per bucket and cached. S3 has no push notification API that
//! `object_store` exposes; notifications are produced by polling the bucket
//! listing and diffing consecutive snapshots.
//!
//! The first listing is the baseline and is taken when the notification
//! stream is first polled, not when it is created. Changes made before that
//! first poll are not reported.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::{
    delimit, EventClass, EventName, EventRecord, NotificationFilter, NotificationInfo,
    NotificationStream, ObjectInfo, ObjectInfoStream, ObjectReader, ObjectStat,
};
use crate::traits::ObjectClient;

/// Connection settings for [`S3ObjectClient`].
#[derive(Clone)]
pub struct S3ClientConfig {
    /// `host:port` or a full URL. A bare address gets `http://` or
    /// `https://` depending on `secure`.
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Use TLS. Fixed for the lifetime of the client.
    pub secure: bool,
    pub region: String,
    /// Interval between listing polls of a notification subscription.
    pub poll_interval: Duration,
}

impl S3ClientConfig {
    pub fn new(
        endpoint: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            secure: false,
            region: "us-east-1".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// The endpoint as a URL with an explicit scheme.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.secure { "https" } else { "http" };
            format!("{scheme}://{}", self.endpoint)
        }
    }
}

impl std::fmt::Debug for S3ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secure", &self.secure)
            .field("region", &self.region)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// [`ObjectClient`] for S3-compatible endpoints (AWS S3, MinIO, ...).
pub struct S3ObjectClient {
    config: S3ClientConfig,
    stores: RwLock<HashMap<String, Arc<AmazonS3>>>,
}

impl S3ObjectClient {
    /// Create a client for the given endpoint. No request is made until the
    /// first operation.
    pub fn connect(config: S3ClientConfig) -> StoreResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(StoreError::InvalidEndpoint(config.endpoint));
        }
        info!(endpoint = %config.endpoint_url(), secure = config.secure, "S3 client configured");
        Ok(Self {
            config,
            stores: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &S3ClientConfig {
        &self.config
    }

    fn store_for(&self, bucket: &str) -> StoreResult<Arc<AmazonS3>> {
        if let Some(store) = self.stores.read().expect("lock poisoned").get(bucket) {
            return Ok(Arc::clone(store));
        }
        let store = AmazonS3Builder::new()
            .with_endpoint(self.config.endpoint_url())
            .with_region(&self.config.region)
            .with_bucket_name(bucket)
            .with_access_key_id(&self.config.access_key_id)
            .with_secret_access_key(&self.config.secret_access_key)
            .with_allow_http(!self.config.secure)
            .with_virtual_hosted_style_request(false)
            .build()?;
        let store = Arc::new(store);
        self.stores
            .write()
            .expect("lock poisoned")
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::clone(&store));
        Ok(store)
    }
}

impl std::fmt::Debug for S3ObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn object_path(key: &str) -> StoreResult<Path> {
    Path::parse(key).map_err(|e| StoreError::InvalidKey {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// The deepest whole path segment containing `prefix`. `object_store`
/// lists by segment, so listings start there and are narrowed by string
/// prefix afterwards.
fn listing_root(prefix: &str) -> Option<Path> {
    match prefix.rfind('/') {
        Some(idx) if idx > 0 => Some(Path::from(&prefix[..idx])),
        _ => None,
    }
}

fn flat_listing(store: Arc<AmazonS3>, prefix: &str) -> ObjectInfoStream {
    let root = listing_root(prefix);
    let prefix = prefix.to_string();
    store
        .list(root.as_ref())
        .map_err(StoreError::from)
        .try_filter(move |meta| future::ready(meta.location.as_ref().starts_with(&prefix)))
        .map_ok(|meta| ObjectInfo::object(meta.location.to_string(), meta.size as u64, meta.e_tag))
        .boxed()
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    fn list_objects(&self, bucket: &str, prefix: &str, recursive: bool) -> ObjectInfoStream {
        let store = match self.store_for(bucket) {
            Ok(store) => store,
            Err(e) => return stream::once(future::ready(Err(e))).boxed(),
        };
        let flat = flat_listing(store, prefix);
        if recursive {
            return flat;
        }
        let prefix = prefix.to_string();
        stream::once(async move {
            let infos: Vec<ObjectInfo> = flat.try_collect().await?;
            Ok::<_, StoreError>(stream::iter(
                delimit(&prefix, infos)
                    .into_iter()
                    .map(Ok::<ObjectInfo, StoreError>),
            ))
        })
        .try_flatten()
        .boxed()
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectReader> {
        let store = self.store_for(bucket)?;
        let path = object_path(key)?;
        let result = store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StoreError::Backend(other),
        })?;
        let stat = ObjectStat {
            key: key.to_string(),
            size: result.meta.size as u64,
            etag: result.meta.e_tag.clone(),
        };
        let body = result.into_stream().map_err(StoreError::from).boxed();
        Ok(ObjectReader::new(stat, body))
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<()> {
        let store = self.store_for(bucket)?;
        let path = object_path(key)?;
        debug!(bucket, key, size = data.len(), "put object");
        store.put(&path, PutPayload::from(data)).await?;
        Ok(())
    }

    fn listen_bucket_notification(
        &self,
        bucket: &str,
        prefix: &str,
        suffix: &str,
        classes: &[EventClass],
        cancel: CancellationToken,
    ) -> NotificationStream {
        let store = match self.store_for(bucket) {
            Ok(store) => store,
            Err(e) => return stream::once(future::ready(Err(e))).boxed(),
        };
        let poller = ListingPoller {
            store,
            bucket: bucket.to_string(),
            filter: NotificationFilter::new(prefix, suffix, classes),
            interval: self.config.poll_interval,
            cancel,
            snapshot: None,
            pending: VecDeque::new(),
            first_poll: true,
        };
        stream::unfold(poller, |mut poller| async move {
            let item = poller.next_item().await?;
            Some((item, poller))
        })
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Listing-diff notifications
// ---------------------------------------------------------------------------

/// What a poll remembers about one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub etag: Option<String>,
    pub size: u64,
    pub last_modified_ms: i64,
}

impl From<&ObjectMeta> for Fingerprint {
    fn from(meta: &ObjectMeta) -> Self {
        Self {
            etag: meta.e_tag.clone(),
            size: meta.size as u64,
            last_modified_ms: meta.last_modified.timestamp_millis(),
        }
    }
}

/// Bucket listing keyed by object key.
pub type Snapshot = BTreeMap<String, Fingerprint>;

/// Records describing the change from `old` to `new`: created for new or
/// changed keys, removed for vanished keys. Output is in key order with
/// creations first.
pub fn diff_snapshots(bucket: &str, old: &Snapshot, new: &Snapshot) -> Vec<EventRecord> {
    let mut records = Vec::new();
    for (key, fingerprint) in new {
        if old.get(key) != Some(fingerprint) {
            records.push(
                EventRecord::new(EventName::ObjectCreatedPut, bucket, key.as_str())
                    .with_size(fingerprint.size),
            );
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            records.push(EventRecord::new(
                EventName::ObjectRemovedDelete,
                bucket,
                key.as_str(),
            ));
        }
    }
    records
}

struct ListingPoller {
    store: Arc<AmazonS3>,
    bucket: String,
    filter: NotificationFilter,
    interval: Duration,
    cancel: CancellationToken,
    snapshot: Option<Snapshot>,
    pending: VecDeque<NotificationInfo>,
    first_poll: bool,
}

impl ListingPoller {
    async fn next_item(&mut self) -> Option<StoreResult<NotificationInfo>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(info) = self.pending.pop_front() {
                return Some(Ok(info));
            }
            if !self.first_poll {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            self.first_poll = false;

            let listed = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                listed = self.list_all() => listed,
            };
            let current = match listed {
                Ok(current) => current,
                Err(e) => {
                    warn!(bucket = %self.bucket, error = %e, "notification poll failed");
                    return Some(Err(e));
                }
            };
            // The first successful listing is the baseline, not a change.
            let previous = self.snapshot.replace(current);
            if let (Some(previous), Some(current)) = (previous, self.snapshot.as_ref()) {
                let records = diff_snapshots(&self.bucket, &previous, current);
                if let Some(info) = self.filter.apply(NotificationInfo { records }) {
                    debug!(bucket = %self.bucket, changes = info.records.len(), "bucket changed");
                    self.pending.push_back(info);
                }
            }
        }
    }

    async fn list_all(&self) -> StoreResult<Snapshot> {
        let metas: Vec<ObjectMeta> = self.store.list(None).try_collect().await?;
        Ok(metas
            .iter()
            .map(|meta| (meta.location.to_string(), Fingerprint::from(meta)))
            .collect())
    }
}
