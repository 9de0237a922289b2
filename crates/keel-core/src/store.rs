//! The key-value store trait backing every keel component.
//!
//! Implementations are expected to provide linearizable semantics: a
//! successful `compare_and_swap_by_index` means no concurrent writer
//! committed against the same pre-image. All keel mutations go through this
//! trait; it is the single source of truth for workload state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::node::StoreNode;
use crate::node::WatchEvent;

/// Live subscription to changes under a key prefix.
///
/// Dropping the subscription cancels the watch. The stream is lazy: events
/// are only produced while the receiver is polled, and a lagging consumer
/// loses the watch (the store closes the channel) rather than stalling
/// writers. Re-subscribing after a disconnect is the consumer's job.
pub struct WatchSubscription {
    events: mpsc::Receiver<WatchEvent>,
}

impl WatchSubscription {
    /// Wrap a receiver produced by a store backend.
    pub fn new(events: mpsc::Receiver<WatchEvent>) -> Self {
        Self { events }
    }

    /// Receive the next event; `None` when the watch has terminated.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }
}

/// Hierarchical key-value store with per-key compare-and-swap.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a single entry.
    async fn get(&self, key: &str) -> Result<StoreNode, StoreError>;

    /// Create an entry, failing with [`StoreError::ResourceExists`] if the
    /// key is already present.
    async fn create(&self, node: StoreNode) -> Result<(), StoreError>;

    /// Unconditionally set a single entry.
    async fn set(&self, node: StoreNode) -> Result<(), StoreError>;

    /// Set several entries; not atomic across keys.
    async fn set_multi(&self, nodes: Vec<StoreNode>) -> Result<(), StoreError>;

    /// Replace the entry at `node.key` only if its current modification
    /// index equals `index`.
    async fn compare_and_swap_by_index(&self, index: u64, node: StoreNode) -> Result<(), StoreError>;

    /// Delete the entry at `key` only if its current modification index
    /// equals `index`.
    async fn compare_and_delete_by_index(&self, index: u64, key: &str) -> Result<(), StoreError>;

    /// Unconditionally delete an entry.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete several entries, ignoring keys that are already gone.
    async fn delete_multi(&self, keys: Vec<String>) -> Result<(), StoreError>;

    /// List all leaf entries under a prefix. An absent prefix yields an
    /// empty list, not an error.
    async fn list_recursively(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError>;

    /// Subscribe to changes under a prefix.
    async fn watch(&self, prefix: &str) -> Result<WatchSubscription, StoreError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<StoreNode, StoreError> {
        (**self).get(key).await
    }

    async fn create(&self, node: StoreNode) -> Result<(), StoreError> {
        (**self).create(node).await
    }

    async fn set(&self, node: StoreNode) -> Result<(), StoreError> {
        (**self).set(node).await
    }

    async fn set_multi(&self, nodes: Vec<StoreNode>) -> Result<(), StoreError> {
        (**self).set_multi(nodes).await
    }

    async fn compare_and_swap_by_index(&self, index: u64, node: StoreNode) -> Result<(), StoreError> {
        (**self).compare_and_swap_by_index(index, node).await
    }

    async fn compare_and_delete_by_index(&self, index: u64, key: &str) -> Result<(), StoreError> {
        (**self).compare_and_delete_by_index(index, key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn delete_multi(&self, keys: Vec<String>) -> Result<(), StoreError> {
        (**self).delete_multi(keys).await
    }

    async fn list_recursively(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError> {
        (**self).list_recursively(prefix).await
    }

    async fn watch(&self, prefix: &str) -> Result<WatchSubscription, StoreError> {
        (**self).watch(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::InMemoryKeyValueStore;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn key_value_store_is_send_sync() {
        assert_send::<Arc<dyn KeyValueStore>>();
        assert_sync::<Arc<dyn KeyValueStore>>();
    }

    #[tokio::test]
    async fn arc_store_delegates() {
        let store = InMemoryKeyValueStore::new();
        let arc_store: Arc<dyn KeyValueStore> = store;

        arc_store.set(StoreNode::new("key", "value")).await.unwrap();
        let node = arc_store.get("key").await.unwrap();
        assert_eq!(node.value, "value");
    }

    #[tokio::test]
    async fn dyn_store_can_be_boxed() {
        let store: Box<dyn KeyValueStore> = Box::new(Arc::new(InMemoryKeyValueStore::default()));

        store.set(StoreNode::new("boxed", "works")).await.unwrap();
        let node = store.get("boxed").await.unwrap();
        assert_eq!(node.value, "works");
    }
}
