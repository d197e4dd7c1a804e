use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// One entry produced by a bucket listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key, or the common prefix when `is_prefix` is set.
    pub key: String,
    /// Declared object size in bytes (zero for common prefixes).
    pub size: u64,
    /// Entity tag reported by the store, if any.
    pub etag: Option<String>,
    /// `true` for a common prefix returned by a non-recursive listing.
    pub is_prefix: bool,
}

impl ObjectInfo {
    /// An entry describing a stored object.
    pub fn object(key: impl Into<String>, size: u64, etag: Option<String>) -> Self {
        Self {
            key: key.into(),
            size,
            etag,
            is_prefix: false,
        }
    }

    /// An entry describing a common prefix ("directory").
    pub fn prefix(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            etag: None,
            is_prefix: true,
        }
    }
}

/// Stream of listing entries.
pub type ObjectInfoStream = BoxStream<'static, StoreResult<ObjectInfo>>;

/// Collapse a sorted flat listing into a delimited one: direct children of
/// `prefix` are kept, deeper keys are replaced by one entry per common prefix.
pub(crate) fn delimit(prefix: &str, flat: Vec<ObjectInfo>) -> Vec<ObjectInfo> {
    let mut out: Vec<ObjectInfo> = Vec::with_capacity(flat.len());
    for info in flat {
        let common = info
            .key
            .get(prefix.len()..)
            .and_then(|rest| rest.find('/'))
            .map(|idx| info.key[..prefix.len() + idx + 1].to_string());
        match common {
            Some(common) => {
                if out.last().map(|last| last.key.as_str()) != Some(common.as_str()) {
                    out.push(ObjectInfo::prefix(common));
                }
            }
            None => out.push(info),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Object reads
// ---------------------------------------------------------------------------

/// Metadata returned alongside an object body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    pub key: String,
    /// Declared size of the object body in bytes.
    pub size: u64,
    pub etag: Option<String>,
}

/// Largest buffer [`ObjectReader::read_all`] reserves before reading.
pub const INITIAL_READ_CAPACITY: usize = 64 * 1024;

/// An open object: its stat plus a stream of body chunks.
pub struct ObjectReader {
    stat: ObjectStat,
    body: BoxStream<'static, StoreResult<Bytes>>,
}

impl ObjectReader {
    /// Wrap a chunk stream with the object's stat.
    pub fn new(stat: ObjectStat, body: BoxStream<'static, StoreResult<Bytes>>) -> Self {
        Self { stat, body }
    }

    /// A reader over an in-memory body whose declared size is its length.
    pub fn from_bytes(key: impl Into<String>, data: Bytes, etag: Option<String>) -> Self {
        let stat = ObjectStat {
            key: key.into(),
            size: data.len() as u64,
            etag,
        };
        Self::new(stat, stream::once(async move { Ok(data) }).boxed())
    }

    pub fn stat(&self) -> &ObjectStat {
        &self.stat
    }

    /// Read the whole body.
    ///
    /// Fails with [`StoreError::SizeMismatch`] when the number of bytes read
    /// differs from the size declared in the stat.
    ///
    /// At most [`INITIAL_READ_CAPACITY`] bytes are reserved up front, and
    /// reading stops as soon as the body is longer than declared.
    pub async fn read_all(mut self) -> StoreResult<Bytes> {
        let expected = self.stat.size;
        let capacity = expected.min(INITIAL_READ_CAPACITY as u64) as usize;
        let mut buf = BytesMut::with_capacity(capacity);
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
            if buf.len() as u64 > expected {
                break;
            }
        }
        let actual = buf.len() as u64;
        if actual != expected {
            return Err(StoreError::SizeMismatch {
                key: self.stat.key,
                expected,
                actual,
            });
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("stat", &self.stat)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Concrete S3 event names emitted by the clients in this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    ObjectCreatedPut,
    ObjectCreatedCopy,
    ObjectRemovedDelete,
}

impl EventName {
    /// Wire form, e.g. `s3:ObjectCreated:Put`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectCreatedPut => "s3:ObjectCreated:Put",
            Self::ObjectCreatedCopy => "s3:ObjectCreated:Copy",
            Self::ObjectRemovedDelete => "s3:ObjectRemoved:Delete",
        }
    }

    /// The event class this name belongs to.
    pub fn class(&self) -> EventClass {
        match self {
            Self::ObjectCreatedPut | Self::ObjectCreatedCopy => EventClass::ObjectCreated,
            Self::ObjectRemovedDelete => EventClass::ObjectRemoved,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wildcard event classes used to filter a notification subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    /// `s3:ObjectCreated:*`
    ObjectCreated,
    /// `s3:ObjectRemoved:*`
    ObjectRemoved,
}

impl EventClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectCreated => "s3:ObjectCreated:*",
            Self::ObjectRemoved => "s3:ObjectRemoved:*",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3:ObjectCreated:*" => Ok(Self::ObjectCreated),
            "s3:ObjectRemoved:*" => Ok(Self::ObjectRemoved),
            other => Err(format!("unsupported event class: {other}")),
        }
    }
}

/// One object change carried by a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub event: EventName,
    pub bucket: String,
    pub key: String,
    /// Object size after the change (absent for removals).
    pub size: Option<u64>,
}

impl EventRecord {
    pub fn new(event: EventName, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            event,
            bucket: bucket.into(),
            key: key.into(),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// A batch of records delivered together by the notification feed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationInfo {
    pub records: Vec<EventRecord>,
}

impl NotificationInfo {
    pub fn single(record: EventRecord) -> Self {
        Self {
            records: vec![record],
        }
    }
}

/// Stream of notifications; an `Err` item reports a feed failure and the
/// stream keeps going afterwards.
pub type NotificationStream = BoxStream<'static, StoreResult<NotificationInfo>>;

/// Subscription filter applied by clients to every record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pub prefix: String,
    pub suffix: String,
    /// Accepted event classes; empty accepts every class.
    pub classes: Vec<EventClass>,
}

impl NotificationFilter {
    pub fn new(prefix: &str, suffix: &str, classes: &[EventClass]) -> Self {
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            classes: classes.to_vec(),
        }
    }

    /// Returns `true` if the record passes the prefix, suffix and class checks.
    pub fn matches(&self, record: &EventRecord) -> bool {
        if !record.key.starts_with(&self.prefix) || !record.key.ends_with(&self.suffix) {
            return false;
        }
        self.classes.is_empty() || self.classes.contains(&record.event.class())
    }

    /// Keep only the matching records; `None` when nothing is left.
    pub fn apply(&self, info: NotificationInfo) -> Option<NotificationInfo> {
        let records: Vec<EventRecord> = info
            .records
            .into_iter()
            .filter(|r| self.matches(r))
            .collect();
        if records.is_empty() {
            None
        } else {
            Some(NotificationInfo { records })
        }
    }
}
