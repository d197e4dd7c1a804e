//! Key/value configuration backend over an S3-compatible bucket.
//!
//! Each configuration key is one object holding a JSON document, stored
//! under `root_path + key + ".json"`. The backend offers four operations:
//!
//! - **get**: merge every JSON object under a prefix into one tree keyed by
//!   logical key
//! - **list**: raw storage keys and bodies under a prefix
//! - **set**: write bytes to a storage key
//! - **watch**: stream change events driven by bucket notifications
//!
//! ```no_run
//! use bucketkv_backend::{Backend, BackendConfig};
//!
//! # async fn run() -> Result<(), bucketkv_backend::BackendError> {
//! let config = BackendConfig::from_env();
//! let backend = Backend::new(&["localhost:9000".to_string()], config)?;
//! let tree = backend.get("").await?;
//! println!("{}", String::from_utf8_lossy(&tree));
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod error;
pub mod keys;
pub mod traits;
pub mod types;
pub mod watch;

pub use backend::Backend;
pub use config::{AggregationPolicy, BackendConfig, Credentials};
pub use error::{BackendError, BackendResult, WatchError};
pub use keys::{to_logical, to_storage};
pub use traits::KvBackend;
pub use types::{ChangeEvent, ChangeReceiver, KvPair};
pub use watch::Watcher;
