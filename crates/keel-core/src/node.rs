//! Node and event types for the hierarchical key-value store.

use serde::Deserialize;
use serde::Serialize;

/// A single leaf entry in the store.
///
/// The `index` is the store's per-key modification index: it changes on every
/// successful write to the key and is the pre-image token for
/// compare-and-swap / compare-and-delete. A successful CAS against a given
/// index implies no concurrent writer observed the same pre-image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreNode {
    /// Full path of the entry (e.g. `/v1/task/some-guid`).
    pub key: String,
    /// Stored payload, JSON for all keel records.
    pub value: String,
    /// Time-to-live in seconds; 0 means the entry does not expire.
    pub ttl_seconds: u64,
    /// Modification index assigned by the store on the last write.
    pub index: u64,
}

impl StoreNode {
    /// Create a node with no TTL.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl_seconds: 0,
            index: 0,
        }
    }

    /// Create a node that expires after `ttl_seconds`.
    pub fn with_ttl(key: impl Into<String>, value: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl_seconds,
            index: 0,
        }
    }
}

/// A change observed by a watch.
///
/// Exactly one of the combinations below occurs:
/// - create: `node` set, `prev_node` empty
/// - change: both set
/// - delete/expire: `prev_node` set, `node` empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// State of the entry after the change, if it still exists.
    pub node: Option<StoreNode>,
    /// State of the entry before the change, if it existed.
    pub prev_node: Option<StoreNode>,
}

impl WatchEvent {
    /// Event for a newly created entry.
    pub fn created(node: StoreNode) -> Self {
        Self {
            node: Some(node),
            prev_node: None,
        }
    }

    /// Event for a modified entry.
    pub fn changed(prev_node: StoreNode, node: StoreNode) -> Self {
        Self {
            node: Some(node),
            prev_node: Some(prev_node),
        }
    }

    /// Event for a deleted or expired entry.
    pub fn deleted(prev_node: StoreNode) -> Self {
        Self {
            node: None,
            prev_node: Some(prev_node),
        }
    }
}
