use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{
    delimit, EventClass, EventName, EventRecord, NotificationFilter, NotificationInfo,
    NotificationStream, ObjectInfo, ObjectInfoStream, ObjectReader, ObjectStat,
};
use crate::traits::ObjectClient;

/// Default capacity of the notification broadcast channel.
const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// Item published on the internal notification channel.
#[derive(Clone, Debug)]
enum Notice {
    Records(NotificationInfo),
    Fault(String),
}

#[derive(Clone, Debug)]
struct StoredEntry {
    data: Bytes,
    /// Size reported by stat; normally `data.len()`.
    declared_size: u64,
    etag: String,
}

/// In-memory object client with live bucket notifications.
///
/// Buckets are `BTreeMap`s so listings come back in lexicographic key order,
/// the same order S3 uses. Every write or removal is published on a
/// broadcast channel that backs [`ObjectClient::listen_bucket_notification`].
/// Intended for tests and embedding.
pub struct InMemoryObjectClient {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredEntry>>>,
    notifier: broadcast::Sender<Notice>,
    closed: CancellationToken,
    calls: AtomicUsize,
    next_etag: AtomicU64,
}

impl InMemoryObjectClient {
    /// Create a client with no buckets.
    pub fn new() -> Self {
        Self::with_notification_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Create a client whose subscribers may lag by at most `capacity`
    /// notifications before they start dropping.
    pub fn with_notification_capacity(capacity: usize) -> Self {
        let (notifier, _) = broadcast::channel(capacity.max(1));
        Self {
            buckets: RwLock::new(HashMap::new()),
            notifier,
            closed: CancellationToken::new(),
            calls: AtomicUsize::new(0),
            next_etag: AtomicU64::new(1),
        }
    }

    /// Create an empty bucket. Returns `false` if it already existed.
    pub fn create_bucket(&self, bucket: &str) -> bool {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        if buckets.contains_key(bucket) {
            return false;
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        true
    }

    /// Remove an object, publishing an `s3:ObjectRemoved:Delete` record.
    /// Returns `true` if the object existed.
    pub fn remove_object(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let removed = {
            let mut buckets = self.buckets.write().expect("lock poisoned");
            let objects = buckets
                .get_mut(bucket)
                .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
            objects.remove(key).is_some()
        };
        if removed {
            self.publish(EventRecord::new(EventName::ObjectRemovedDelete, bucket, key));
        }
        Ok(removed)
    }

    /// Store an object whose stat reports `declared_size` instead of the
    /// body length. Simulates a store whose metadata disagrees with the data.
    pub fn put_object_with_size(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        declared_size: u64,
    ) -> StoreResult<()> {
        self.insert(bucket, key, data, declared_size)
    }

    /// Publish an error item to every active subscription.
    pub fn inject_notification_error(&self, reason: impl Into<String>) {
        let _ = self.notifier.send(Notice::Fault(reason.into()));
    }

    /// End every notification stream handed out by this client.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Number of [`ObjectClient`] calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of objects in `bucket` (zero if the bucket does not exist).
    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .expect("lock poisoned")
            .get(bucket)
            .map_or(0, BTreeMap::len)
    }

    /// Number of live notification subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.notifier.receiver_count()
    }

    fn insert(&self, bucket: &str, key: &str, data: Bytes, declared_size: u64) -> StoreResult<()> {
        let etag = format!("{:016x}", self.next_etag.fetch_add(1, Ordering::Relaxed));
        {
            let mut buckets = self.buckets.write().expect("lock poisoned");
            let objects = buckets
                .get_mut(bucket)
                .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
            objects.insert(
                key.to_string(),
                StoredEntry {
                    data,
                    declared_size,
                    etag,
                },
            );
        }
        self.publish(
            EventRecord::new(EventName::ObjectCreatedPut, bucket, key).with_size(declared_size),
        );
        Ok(())
    }

    fn publish(&self, record: EventRecord) {
        debug!(bucket = %record.bucket, key = %record.key, event = %record.event, "publishing notification");
        // No receivers is fine: nobody is listening.
        let _ = self
            .notifier
            .send(Notice::Records(NotificationInfo::single(record)));
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for InMemoryObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectClient for InMemoryObjectClient {
    fn list_objects(&self, bucket: &str, prefix: &str, recursive: bool) -> ObjectInfoStream {
        self.count_call();
        let buckets = self.buckets.read().expect("lock poisoned");
        let Some(objects) = buckets.get(bucket) else {
            let err = StoreError::NoSuchBucket(bucket.to_string());
            return stream::once(async move { Err(err) }).boxed();
        };

        let flat: Vec<ObjectInfo> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| {
                ObjectInfo::object(key.clone(), entry.declared_size, Some(entry.etag.clone()))
            })
            .collect();
        let entries = if recursive {
            flat
        } else {
            delimit(prefix, flat)
        };
        stream::iter(entries.into_iter().map(Ok)).boxed()
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectReader> {
        self.count_call();
        let buckets = self.buckets.read().expect("lock poisoned");
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        let entry = objects.get(key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        let stat = ObjectStat {
            key: key.to_string(),
            size: entry.declared_size,
            etag: Some(entry.etag.clone()),
        };
        let data = entry.data.clone();
        Ok(ObjectReader::new(
            stat,
            stream::once(async move { Ok(data) }).boxed(),
        ))
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<()> {
        self.count_call();
        let size = data.len() as u64;
        self.insert(bucket, key, data, size)
    }

    fn listen_bucket_notification(
        &self,
        bucket: &str,
        prefix: &str,
        suffix: &str,
        classes: &[EventClass],
        cancel: CancellationToken,
    ) -> NotificationStream {
        self.count_call();
        let state = Subscription {
            rx: self.notifier.subscribe(),
            bucket: bucket.to_string(),
            filter: NotificationFilter::new(prefix, suffix, classes),
            cancel,
            closed: self.closed.clone(),
        };
        stream::unfold(state, |mut sub| async move {
            let item = sub.next_item().await?;
            Some((item, sub))
        })
        .boxed()
    }
}

/// State of one notification subscription.
struct Subscription {
    rx: broadcast::Receiver<Notice>,
    bucket: String,
    filter: NotificationFilter,
    cancel: CancellationToken,
    closed: CancellationToken,
}

impl Subscription {
    /// Wait for the next deliverable item; `None` ends the stream.
    async fn next_item(&mut self) -> Option<StoreResult<NotificationInfo>> {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = self.closed.cancelled() => return None,
                received = self.rx.recv() => received,
            };
            match received {
                Ok(Notice::Records(mut info)) => {
                    info.records.retain(|r| r.bucket == self.bucket);
                    if let Some(info) = self.filter.apply(info) {
                        return Some(Ok(info));
                    }
                }
                Ok(Notice::Fault(reason)) => return Some(Err(StoreError::Notification(reason))),
                Err(RecvError::Lagged(skipped)) => {
                    return Some(Err(StoreError::NotificationLagged(skipped)))
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl std::fmt::Debug for InMemoryObjectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bucket_count = self.buckets.read().expect("lock poisoned").len();
        f.debug_struct("InMemoryObjectClient")
            .field("bucket_count", &bucket_count)
            .field("call_count", &self.call_count())
            .finish()
    }
}
