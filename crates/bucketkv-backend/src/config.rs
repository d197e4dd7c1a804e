use std::time::Duration;

use tracing::warn;

use crate::error::{BackendError, BackendResult};

/// Environment variable holding the access key.
pub const ACCESS_KEY_ID_VAR: &str = "ACCESS_KEY_ID";
/// Environment variable holding the secret key.
pub const SECRET_ACCESS_KEY_VAR: &str = "SECRET_ACCESS_KEY";
/// Environment variable naming the bucket.
pub const BUCKET_NAME_VAR: &str = "BUCKET_NAME";
/// Environment variable holding the root path stripped from keys.
pub const ROOT_PATH_VAR: &str = "ROOT_PATH";

/// Access credentials for the object store.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Both keys must be non-empty.
    pub fn validate(&self) -> BackendResult<()> {
        if self.access_key_id.is_empty() {
            warn!("access key id is not set, cannot authenticate to the object store");
            return Err(BackendError::Authentication(
                "access key id is not set".into(),
            ));
        }
        if self.secret_access_key.is_empty() {
            warn!("access key id is set but the secret access key is empty");
            return Err(BackendError::Authentication(
                "secret access key is not set".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// What `get` does with a listed object that is not a JSON object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// Skip the object and keep aggregating.
    #[default]
    Tolerant,
    /// Fail the whole call with [`BackendError::Decode`].
    Strict,
}

/// Backend configuration, read once and shared by every component.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Target bucket. Every operation requires it.
    pub bucket: String,
    /// Prefix stripped from storage keys by `get`.
    pub root_path: String,
    pub credentials: Credentials,
    /// Use TLS to reach the endpoint.
    pub secure: bool,
    pub region: String,
    /// Listing poll interval for S3 notification subscriptions.
    pub poll_interval: Duration,
    pub aggregation: AggregationPolicy,
    /// Capacity of each watch channel.
    pub watch_buffer: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            root_path: String::new(),
            credentials: Credentials::default(),
            secure: false,
            region: "us-east-1".to_string(),
            poll_interval: Duration::from_secs(1),
            aggregation: AggregationPolicy::Tolerant,
            watch_buffer: 64,
        }
    }
}

impl BackendConfig {
    /// Read `ACCESS_KEY_ID`, `SECRET_ACCESS_KEY`, `BUCKET_NAME` and
    /// `ROOT_PATH` from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_with_prefix("")
    }

    /// Like [`Self::from_env`] with every variable name prefixed, e.g.
    /// `MINIO_` reads `MINIO_BUCKET_NAME`.
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Unset variables become
    /// empty strings; the remaining settings keep their defaults.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{prefix}{name}")).unwrap_or_default();
        Self {
            bucket: var(BUCKET_NAME_VAR),
            root_path: var(ROOT_PATH_VAR),
            credentials: Credentials::new(var(ACCESS_KEY_ID_VAR), var(SECRET_ACCESS_KEY_VAR)),
            ..Self::default()
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_aggregation(mut self, policy: AggregationPolicy) -> Self {
        self.aggregation = policy;
        self
    }

    /// The bucket name, or a configuration error if it is unset.
    pub fn require_bucket(&self) -> BackendResult<&str> {
        if self.bucket.is_empty() {
            warn!("no bucket name is set, cannot reach the bucket");
            return Err(BackendError::Configuration(
                "bucket name is not set".into(),
            ));
        }
        Ok(&self.bucket)
    }

    /// The root path, or a configuration error if it is unset.
    pub fn require_root_path(&self) -> BackendResult<&str> {
        if self.root_path.is_empty() {
            warn!("no root path is set, cannot map storage keys");
            return Err(BackendError::Configuration("root path is not set".into()));
        }
        Ok(&self.root_path)
    }
}
