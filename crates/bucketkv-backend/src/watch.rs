//! Watch subscriptions: bucket notifications turned into change events.
//!
//! Each subscription is one spawned task that owns a child cancellation
//! token and the sending half of a bounded channel. The notification feed is
//! opened before [`Watcher::watch`] returns. With
//! [`InMemoryObjectClient`](bucketkv_store::InMemoryObjectClient) that means
//! changes made after the call are observed; the polling S3 client only sees
//! changes made after its first listing.

use std::sync::Arc;

use bucketkv_store::{EventClass, NotificationInfo, NotificationStream, ObjectClient};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::fetch_value;
use crate::config::BackendConfig;
use crate::error::WatchError;
use crate::keys::to_logical;
use crate::types::{ChangeEvent, ChangeReceiver};

/// Event classes every subscription listens for.
pub const WATCHED_CLASSES: [EventClass; 2] = [EventClass::ObjectCreated, EventClass::ObjectRemoved];

/// Starts watch subscriptions against one client and configuration.
#[derive(Clone)]
pub struct Watcher {
    client: Arc<dyn ObjectClient>,
    config: Arc<BackendConfig>,
}

impl Watcher {
    pub fn new(client: Arc<dyn ObjectClient>, config: Arc<BackendConfig>) -> Self {
        Self { client, config }
    }

    /// Watch every object whose storage key starts with `key` (an empty key
    /// watches the whole bucket).
    ///
    /// Matching is by plain string prefix, also for a full storage key:
    /// watching `cfg/db.json` reports `cfg/db.json.bak` too, as logical key
    /// `db.bak`.
    ///
    /// Returns immediately. The subscription ends when `cancel` fires, the
    /// receiver is dropped, or the notification feed closes. Without a
    /// configured bucket the receiver yields one error and then closes, and
    /// no task is spawned.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch(&self, key: &str, cancel: CancellationToken) -> ChangeReceiver {
        let (tx, rx) = mpsc::channel(self.config.watch_buffer.max(1));

        let bucket = match self.config.require_bucket() {
            Ok(bucket) => bucket.to_string(),
            Err(_) => {
                let event = ChangeEvent::Error(WatchError::Configuration(
                    "bucket name is not set".into(),
                ));
                // Fresh channel with capacity >= 1: cannot be full.
                let _ = tx.try_send(event);
                return rx;
            }
        };

        let stop = cancel.child_token();
        let notifications =
            self.client
                .listen_bucket_notification(&bucket, "", "", &WATCHED_CLASSES, stop.clone());
        let task = WatchTask {
            client: Arc::clone(&self.client),
            bucket,
            root_path: self.config.root_path.clone(),
            key: key.to_string(),
            tx,
            stop,
        };
        info!(bucket = %task.bucket, key = %task.key, "watch started");
        tokio::spawn(task.run(notifications));
        rx
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("bucket", &self.config.bucket)
            .finish_non_exhaustive()
    }
}

/// State owned by one running subscription.
struct WatchTask {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    root_path: String,
    key: String,
    tx: mpsc::Sender<ChangeEvent>,
    stop: CancellationToken,
}

impl WatchTask {
    async fn run(self, mut notifications: NotificationStream) {
        // Ends the client-side subscription however the loop exits.
        let _stop_on_exit = self.stop.clone().drop_guard();

        loop {
            let item = tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = self.tx.closed() => break,
                item = notifications.next() => item,
            };
            let delivered = match item {
                None => break,
                Some(Err(e)) => {
                    warn!(bucket = %self.bucket, error = %e, "notification error");
                    self.send(ChangeEvent::Error(WatchError::Notification(e.to_string())))
                        .await
                }
                Some(Ok(info)) => self.forward(info).await,
            };
            if !delivered {
                break;
            }
        }
        drop(notifications);
        debug!(bucket = %self.bucket, key = %self.key, "watch ended");
    }

    /// Re-read every watched object named in `info` and send the result, in
    /// record order. Returns `false` once the subscriber is gone or the
    /// watch is cancelled.
    async fn forward(&self, info: NotificationInfo) -> bool {
        for record in info.records {
            if !record.key.starts_with(&self.key) {
                continue;
            }
            debug!(key = %record.key, event = %record.event, "object changed");
            let fetched = tokio::select! {
                _ = self.stop.cancelled() => return false,
                fetched = fetch_value(self.client.as_ref(), &self.bucket, &record.key) => fetched,
            };
            let event = match fetched {
                Ok(value) => ChangeEvent::ValueUpdated {
                    key: to_logical(&record.key, &self.root_path),
                    value,
                },
                Err(e) => ChangeEvent::Error(WatchError::Fetch {
                    key: record.key.clone(),
                    reason: e.to_string(),
                }),
            };
            if !self.send(event).await {
                return false;
            }
        }
        true
    }

    async fn send(&self, event: ChangeEvent) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bucketkv_store::{
        EventName, EventRecord, InMemoryObjectClient, ObjectInfoStream, ObjectReader, StoreError,
        StoreResult,
    };
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Mutex;
    use std::time::Duration;

    const BUCKET: &str = "configs";

    /// Objects come from an in-memory client; the notification feed is a
    /// fixed script that ends after its last item.
    struct ScriptedClient {
        objects: InMemoryObjectClient,
        script: Mutex<Option<Vec<StoreResult<NotificationInfo>>>>,
        /// Reads of this key never complete.
        stalled_key: Option<String>,
    }

    impl ScriptedClient {
        async fn new(
            objects: &[(&str, &str)],
            script: Vec<StoreResult<NotificationInfo>>,
        ) -> Self {
            let store = InMemoryObjectClient::new();
            store.create_bucket(BUCKET);
            for (key, body) in objects {
                store
                    .put_object(BUCKET, key, Bytes::from(body.to_string()))
                    .await
                    .unwrap();
            }
            Self {
                objects: store,
                script: Mutex::new(Some(script)),
                stalled_key: None,
            }
        }

        fn stalling_on(mut self, key: &str) -> Self {
            self.stalled_key = Some(key.to_string());
            self
        }
    }

    #[async_trait]
    impl ObjectClient for ScriptedClient {
        fn list_objects(&self, bucket: &str, prefix: &str, recursive: bool) -> ObjectInfoStream {
            self.objects.list_objects(bucket, prefix, recursive)
        }

        async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectReader> {
            if self.stalled_key.as_deref() == Some(key) {
                futures::future::pending::<()>().await;
            }
            self.objects.get_object(bucket, key).await
        }

        async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreResult<()> {
            self.objects.put_object(bucket, key, data).await
        }

        fn listen_bucket_notification(
            &self,
            _bucket: &str,
            _prefix: &str,
            _suffix: &str,
            _classes: &[EventClass],
            _cancel: CancellationToken,
        ) -> NotificationStream {
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            stream::iter(script).boxed()
        }
    }

    fn created(key: &str) -> StoreResult<NotificationInfo> {
        Ok(NotificationInfo::single(EventRecord::new(
            EventName::ObjectCreatedPut,
            BUCKET,
            key,
        )))
    }

    fn config(root: &str) -> Arc<BackendConfig> {
        Arc::new(BackendConfig::default().with_bucket(BUCKET).with_root_path(root))
    }

    async fn drain(mut rx: ChangeReceiver) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watch should make progress")
        {
            events.push(event);
        }
        events
    }

    fn updated(key: &str, body: &str) -> ChangeEvent {
        ChangeEvent::ValueUpdated {
            key: key.to_string(),
            value: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn events_follow_notification_order() {
        let client = ScriptedClient::new(
            &[("cfg/k1.json", r#"{"n":1}"#), ("cfg/k2.json", r#"{"n":2}"#)],
            vec![
                created("cfg/k1.json"),
                Err(StoreError::Notification("feed broke".into())),
                created("cfg/k2.json"),
            ],
        )
        .await;
        let watcher = Watcher::new(Arc::new(client), config("cfg/"));

        let events = drain(watcher.watch("", CancellationToken::new())).await;
        assert_eq!(
            events,
            vec![
                updated("k1", r#"{"n":1}"#),
                ChangeEvent::Error(WatchError::Notification(
                    "notification error: feed broke".into()
                )),
                updated("k2", r#"{"n":2}"#),
            ]
        );
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_and_watch_continues() {
        let client = ScriptedClient::new(
            &[("cfg/k2.json", "{}")],
            vec![created("cfg/gone.json"), created("cfg/k2.json")],
        )
        .await;
        let watcher = Watcher::new(Arc::new(client), config("cfg/"));

        let events = drain(watcher.watch("cfg/", CancellationToken::new())).await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            ChangeEvent::Error(WatchError::Fetch { key, .. }) => assert_eq!(key, "cfg/gone.json"),
            other => panic!("expected fetch error, got {other:?}"),
        }
        assert_eq!(events[1], updated("k2", "{}"));
    }

    #[tokio::test]
    async fn records_outside_watched_key_are_ignored() {
        let client = ScriptedClient::new(
            &[("cfg/a.json", "{}"), ("cfg/b.json", "{}")],
            vec![created("cfg/a.json"), created("cfg/b.json")],
        )
        .await;
        let watcher = Watcher::new(Arc::new(client), config("cfg/"));

        let events = drain(watcher.watch("cfg/b.json", CancellationToken::new())).await;
        assert_eq!(events, vec![updated("b", "{}")]);
    }

    #[tokio::test]
    async fn records_within_one_notification_keep_their_order() {
        let batch = NotificationInfo {
            records: vec![
                EventRecord::new(EventName::ObjectCreatedPut, BUCKET, "cfg/a.json"),
                EventRecord::new(EventName::ObjectCreatedPut, BUCKET, "other/x"),
                EventRecord::new(EventName::ObjectCreatedPut, BUCKET, "cfg/b.json"),
            ],
        };
        let client = ScriptedClient::new(
            &[("cfg/a.json", r#"{"a":1}"#), ("other/x", "x"), ("cfg/b.json", r#"{"b":2}"#)],
            vec![Ok(batch)],
        )
        .await;
        let watcher = Watcher::new(Arc::new(client), config("cfg/"));

        let events = drain(watcher.watch("cfg/", CancellationToken::new())).await;
        assert_eq!(
            events,
            vec![updated("a", r#"{"a":1}"#), updated("b", r#"{"b":2}"#)]
        );
    }

    #[tokio::test]
    async fn full_key_watch_matches_by_prefix() {
        let client = ScriptedClient::new(
            &[("cfg/db.json", "{}"), ("cfg/db.json.bak", "old")],
            vec![created("cfg/db.json.bak"), created("cfg/db.json")],
        )
        .await;
        let watcher = Watcher::new(Arc::new(client), config("cfg/"));

        let events = drain(watcher.watch("cfg/db.json", CancellationToken::new())).await;
        assert_eq!(events, vec![updated("db.bak", "old"), updated("db", "{}")]);
    }

    #[tokio::test]
    async fn cancel_interrupts_slow_fetch() {
        let client = ScriptedClient::new(&[("cfg/slow.json", "{}")], vec![created("cfg/slow.json")])
            .await
            .stalling_on("cfg/slow.json");
        let watcher = Watcher::new(Arc::new(client), config("cfg/"));

        let cancel = CancellationToken::new();
        let rx = watcher.watch("", cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn missing_bucket_yields_single_error() {
        let client = Arc::new(InMemoryObjectClient::new());
        let watcher = Watcher::new(client.clone(), Arc::new(BackendConfig::default()));

        let events = drain(watcher.watch("cfg/a.json", CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ChangeEvent::Error(WatchError::Configuration(_))));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn cancel_ends_subscription() {
        let client = Arc::new(InMemoryObjectClient::new());
        client.create_bucket(BUCKET);
        let watcher = Watcher::new(client.clone(), config("cfg/"));

        let cancel = CancellationToken::new();
        let rx = watcher.watch("", cancel.clone());
        assert_eq!(client.subscriber_count(), 1);

        cancel.cancel();
        assert!(drain(rx).await.is_empty());
        assert_eq!(client.subscriber_count(), 0);
    }

    #[test]
    fn watched_classes_cover_create_and_remove() {
        assert_eq!(WATCHED_CLASSES[0].as_str(), "s3:ObjectCreated:*");
        assert_eq!(WATCHED_CLASSES[1].as_str(), "s3:ObjectRemoved:*");
    }
}
