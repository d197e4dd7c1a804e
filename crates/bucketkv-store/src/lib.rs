//! Object store client layer for bucketkv.
//!
//! Defines the minimum surface bucketkv needs from an S3-compatible object
//! store: flat or delimited listing, whole-object reads with size checking,
//! writes, and a bucket notification feed for object creation and removal.
//!
//! # Clients
//!
//! All clients implement the [`ObjectClient`] trait:
//!
//! - [`InMemoryObjectClient`] -- `BTreeMap` buckets with broadcast
//!   notifications, for tests and embedding
//! - [`S3ObjectClient`] -- S3/MinIO endpoints via `object_store`, with
//!   notifications derived from listing diffs
//!
//! # Rules
//!
//! 1. Listings are in lexicographic key order.
//! 2. Prefixes are plain string prefixes, not path segments.
//! 3. A read either returns exactly the declared number of bytes or fails
//!    with [`StoreError::SizeMismatch`].
//! 4. Notification errors are stream items; the stream continues after them.

pub mod error;
pub mod memory;
pub mod object;
pub mod s3;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectClient;
pub use object::{
    EventClass, EventName, EventRecord, NotificationFilter, NotificationInfo, NotificationStream,
    ObjectInfo, ObjectInfoStream, ObjectReader, ObjectStat, INITIAL_READ_CAPACITY,
};
pub use s3::{S3ClientConfig, S3ObjectClient};
pub use traits::ObjectClient;
