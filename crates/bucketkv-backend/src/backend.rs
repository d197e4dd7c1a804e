use std::sync::Arc;

use async_trait::async_trait;
use bucketkv_store::{ObjectClient, S3ClientConfig, S3ObjectClient, StoreResult};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, list_pairs};
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::traits::KvBackend;
use crate::types::{ChangeReceiver, KvPair};
use crate::watch::Watcher;

/// Key/value backend over one bucket.
///
/// Cheap to clone; clones share the client handle and configuration.
#[derive(Clone)]
pub struct Backend {
    client: Arc<dyn ObjectClient>,
    config: Arc<BackendConfig>,
    endpoint: String,
    watcher: Watcher,
}

impl Backend {
    /// Connect to an S3-compatible endpoint. Only `endpoints[0]` is used.
    pub fn new(endpoints: &[String], config: BackendConfig) -> BackendResult<Self> {
        Self::new_with(endpoints, config, |endpoint, config| {
            let mut s3 = S3ClientConfig::new(
                endpoint,
                config.credentials.access_key_id.clone(),
                config.credentials.secret_access_key.clone(),
            );
            s3.secure = config.secure;
            s3.region = config.region.clone();
            s3.poll_interval = config.poll_interval;
            Ok(Arc::new(S3ObjectClient::connect(s3)?))
        })
    }

    /// Like [`Self::new`] with a caller-supplied connector. The connector
    /// runs only after the endpoint list and credentials pass validation.
    pub fn new_with<C, F>(endpoints: &[String], config: BackendConfig, connect: F) -> BackendResult<Self>
    where
        C: ObjectClient + 'static,
        F: FnOnce(&str, &BackendConfig) -> StoreResult<Arc<C>>,
    {
        let Some(endpoint) = endpoints.first() else {
            warn!("no endpoint given, cannot create object store client");
            return Err(BackendError::Configuration("no endpoint given".into()));
        };
        config.credentials.validate()?;
        if endpoints.len() > 1 {
            debug!(ignored = endpoints.len() - 1, "only the first endpoint is used");
        }

        let client: Arc<dyn ObjectClient> = connect(endpoint, &config)?;
        let config = Arc::new(config);
        info!(endpoint = %endpoint, bucket = %config.bucket, "backend ready");
        Ok(Self {
            watcher: Watcher::new(Arc::clone(&client), Arc::clone(&config)),
            client,
            config,
            endpoint: endpoint.clone(),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The endpoint the client was built for.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Merge every JSON object under `prefix` into one tree.
    ///
    /// Requires both bucket and root path. A `null` body becomes a `null`
    /// entry. Other bodies that are not JSON objects are skipped or rejected
    /// according to the configured
    /// [`AggregationPolicy`](crate::config::AggregationPolicy).
    pub async fn get(&self, prefix: &str) -> BackendResult<Bytes> {
        let bucket = self.config.require_bucket()?;
        let root_path = self.config.require_root_path()?;
        aggregate(
            self.client.as_ref(),
            bucket,
            root_path,
            prefix,
            self.config.aggregation,
        )
        .await
    }

    /// Every object under `prefix`, recursively, with its raw body.
    pub async fn list(&self, prefix: &str) -> BackendResult<Vec<KvPair>> {
        let bucket = self.config.require_bucket()?;
        list_pairs(self.client.as_ref(), bucket, prefix).await
    }

    /// Write `value` to `key`. The key is not mapped: callers pass a full
    /// storage key.
    pub async fn set(&self, key: &str, value: Bytes) -> BackendResult<()> {
        let bucket = self.config.require_bucket()?;
        debug!(bucket, key, size = value.len(), "put object");
        self.client.put_object(bucket, key, value).await?;
        Ok(())
    }

    /// Subscribe to changes under `key`. Must be called inside a tokio
    /// runtime.
    pub fn watch(&self, key: &str, cancel: CancellationToken) -> ChangeReceiver {
        self.watcher.watch(key, cancel)
    }
}

#[async_trait]
impl KvBackend for Backend {
    async fn get(&self, prefix: &str) -> BackendResult<Bytes> {
        Backend::get(self, prefix).await
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<KvPair>> {
        Backend::list(self, prefix).await
    }

    async fn set(&self, key: &str, value: Bytes) -> BackendResult<()> {
        Backend::set(self, key, value).await
    }

    fn watch(&self, key: &str, cancel: CancellationToken) -> ChangeReceiver {
        Backend::watch(self, key, cancel)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use bucketkv_store::InMemoryObjectClient;

    fn endpoints() -> Vec<String> {
        vec!["localhost:9000".to_string()]
    }

    fn config() -> BackendConfig {
        BackendConfig::default()
            .with_bucket("configs")
            .with_root_path("cfg/")
            .with_credentials(Credentials::new("ak", "sk"))
    }

    #[test]
    fn new_builds_s3_client_for_first_endpoint() {
        let eps = vec!["minio-a:9000".to_string(), "minio-b:9000".to_string()];
        let backend = Backend::new(&eps, config()).unwrap();
        assert_eq!(backend.endpoint(), "minio-a:9000");
        assert_eq!(backend.config().bucket, "configs");
    }

    #[test]
    fn empty_endpoint_list_is_configuration_error() {
        let err = Backend::new(&[], config()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn endpoints_are_checked_before_credentials() {
        let cfg = config().with_credentials(Credentials::default());
        assert!(Backend::new(&[], cfg).unwrap_err().is_configuration());
    }

    #[test]
    fn connector_error_is_propagated() {
        let eps = vec!["  ".to_string()];
        let err = Backend::new(&eps, config()).unwrap_err();
        assert!(matches!(
            err,
            BackendError::Store(bucketkv_store::StoreError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn trait_object_dispatch() {
        let client = Arc::new(InMemoryObjectClient::new());
        client.create_bucket("configs");
        let backend = Backend::new_with(&endpoints(), config(), |_, _| Ok(client.clone())).unwrap();
        let kv: Arc<dyn KvBackend> = Arc::new(backend);

        kv.set("cfg/a.json", Bytes::from_static(br#"{"x":1}"#))
            .await
            .unwrap();
        assert_eq!(kv.list("cfg/").await.unwrap().len(), 1);
        assert_eq!(&kv.get("").await.unwrap()[..], br#"{"a":{"x":1}}"#);
    }
}
