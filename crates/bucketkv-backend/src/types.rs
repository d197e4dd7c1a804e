use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::WatchError;

/// One stored object: its storage key and raw body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Bytes,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An event delivered to a watch subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The object behind `key` (a logical key) now holds `value`.
    ValueUpdated { key: String, value: Bytes },
    /// Something went wrong; the subscription keeps running unless this is
    /// a [`WatchError::Configuration`].
    Error(WatchError),
}

impl ChangeEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Receiving half of a watch subscription. Closed when the subscription ends.
pub type ChangeReceiver = mpsc::Receiver<ChangeEvent>;
