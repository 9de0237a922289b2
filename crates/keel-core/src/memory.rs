//! Deterministic in-memory store.
//!
//! A complete [`KeyValueStore`] backend over a `BTreeMap`, used by unit and
//! integration tests throughout the workspace. It tracks per-key
//! modification indices from a global revision counter, honours TTLs against
//! an injected [`Clock`] (expiry is applied lazily at the next operation),
//! and fans mutations out to prefix watchers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::error::StoreError;
use crate::node::StoreNode;
use crate::node::WatchEvent;
use crate::store::KeyValueStore;
use crate::store::WatchSubscription;

const WATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
struct Entry {
    value: String,
    ttl_seconds: u64,
    index: u64,
    expires_at_nanos: Option<i64>,
}

struct Watcher {
    prefix: String,
    sender: mpsc::Sender<WatchEvent>,
}

#[derive(Default)]
struct StoreState {
    entries: BTreeMap<String, Entry>,
    revision: u64,
    watchers: Vec<Watcher>,
}

impl StoreState {
    fn node(&self, key: &str, entry: &Entry) -> StoreNode {
        StoreNode {
            key: key.to_string(),
            value: entry.value.clone(),
            ttl_seconds: entry.ttl_seconds,
            index: entry.index,
        }
    }

    /// Drop expired entries, emitting delete events for each.
    fn expire(&mut self, now_nanos: i64) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry.expires_at_nanos, Some(at) if at <= now_nanos))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = self.entries.remove(&key) {
                let prev = self.node(&key, &entry);
                self.notify(WatchEvent::deleted(prev));
            }
        }
    }

    /// Deliver an event to every watcher whose prefix covers it; watchers
    /// that are closed or lagging are dropped.
    fn notify(&mut self, event: WatchEvent) {
        let key = event
            .node
            .as_ref()
            .or(event.prev_node.as_ref())
            .map(|node| node.key.clone())
            .unwrap_or_default();

        self.watchers.retain(|watcher| {
            if !key_in_prefix(&key, &watcher.prefix) {
                return true;
            }
            watcher.sender.try_send(event.clone()).is_ok()
        });
    }
}

fn key_in_prefix(key: &str, prefix: &str) -> bool {
    key == prefix || key.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

/// Thread-safe in-memory [`KeyValueStore`] for tests.
pub struct InMemoryKeyValueStore {
    state: RwLock<StoreState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl InMemoryKeyValueStore {
    /// Create a store on the system clock, wrapped in `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a store whose TTL expiry follows the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(StoreState::default()),
            clock,
        })
    }

    fn expires_at(&self, ttl_seconds: u64) -> Option<i64> {
        if ttl_seconds == 0 {
            None
        } else {
            Some(self.clock.now_nanos() + (ttl_seconds as i64) * 1_000_000_000)
        }
    }

    fn write_entry(&self, state: &mut StoreState, node: StoreNode) {
        state.revision += 1;
        let entry = Entry {
            value: node.value.clone(),
            ttl_seconds: node.ttl_seconds,
            index: state.revision,
            expires_at_nanos: self.expires_at(node.ttl_seconds),
        };

        let prev = state.entries.insert(node.key.clone(), entry.clone());
        let new_node = state.node(&node.key, &entry);
        let event = match prev {
            Some(old) => WatchEvent::changed(state.node(&node.key, &old), new_node),
            None => WatchEvent::created(new_node),
        };
        state.notify(event);
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<StoreNode, StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());

        match state.entries.get(key) {
            Some(entry) => Ok(state.node(key, entry)),
            None => Err(StoreError::not_found(key)),
        }
    }

    async fn create(&self, node: StoreNode) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());

        if state.entries.contains_key(&node.key) {
            return Err(StoreError::exists(&node.key));
        }
        self.write_entry(&mut state, node);
        Ok(())
    }

    async fn set(&self, node: StoreNode) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());
        self.write_entry(&mut state, node);
        Ok(())
    }

    async fn set_multi(&self, nodes: Vec<StoreNode>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());
        for node in nodes {
            self.write_entry(&mut state, node);
        }
        Ok(())
    }

    async fn compare_and_swap_by_index(&self, index: u64, node: StoreNode) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());

        match state.entries.get(&node.key) {
            None => Err(StoreError::not_found(&node.key)),
            Some(entry) if entry.index != index => Err(StoreError::comparison_failed(&node.key)),
            Some(_) => {
                self.write_entry(&mut state, node);
                Ok(())
            }
        }
    }

    async fn compare_and_delete_by_index(&self, index: u64, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());

        match state.entries.get(key) {
            None => Err(StoreError::not_found(key)),
            Some(entry) if entry.index != index => Err(StoreError::comparison_failed(key)),
            Some(_) => {
                if let Some(entry) = state.entries.remove(key) {
                    let prev = state.node(key, &entry);
                    state.notify(WatchEvent::deleted(prev));
                }
                Ok(())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());

        match state.entries.remove(key) {
            Some(entry) => {
                let prev = state.node(key, &entry);
                state.notify(WatchEvent::deleted(prev));
                Ok(())
            }
            None => Err(StoreError::not_found(key)),
        }
    }

    async fn delete_multi(&self, keys: Vec<String>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());

        for key in keys {
            if let Some(entry) = state.entries.remove(&key) {
                let prev = state.node(&key, &entry);
                state.notify(WatchEvent::deleted(prev));
            }
        }
        Ok(())
    }

    async fn list_recursively(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError> {
        let mut state = self.state.write().await;
        state.expire(self.clock.now_nanos());

        let nodes = state
            .entries
            .iter()
            .filter(|(key, _)| key_in_prefix(key, prefix))
            .map(|(key, entry)| state.node(key, entry))
            .collect();
        Ok(nodes)
    }

    async fn watch(&self, prefix: &str) -> Result<WatchSubscription, StoreError> {
        let (sender, receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut state = self.state.write().await;
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(WatchSubscription::new(receiver))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::FakeClock;

    #[tokio::test]
    async fn create_fails_on_existing_key() {
        let store = InMemoryKeyValueStore::new();
        store.create(StoreNode::new("k", "v1")).await.unwrap();

        let err = store.create(StoreNode::new("k", "v2")).await.unwrap_err();
        assert_eq!(err, StoreError::exists("k"));
    }

    #[tokio::test]
    async fn indices_increase_on_every_write() {
        let store = InMemoryKeyValueStore::new();
        store.set(StoreNode::new("k", "v1")).await.unwrap();
        let first = store.get("k").await.unwrap().index;

        store.set(StoreNode::new("k", "v2")).await.unwrap();
        let second = store.get("k").await.unwrap().index;
        assert!(second > first);
    }

    #[tokio::test]
    async fn cas_succeeds_only_against_current_index() {
        let store = InMemoryKeyValueStore::new();
        store.set(StoreNode::new("k", "v1")).await.unwrap();
        let index = store.get("k").await.unwrap().index;

        store.compare_and_swap_by_index(index, StoreNode::new("k", "v2")).await.unwrap();

        let err = store
            .compare_and_swap_by_index(index, StoreNode::new("k", "v3"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::comparison_failed("k"));
        assert_eq!(store.get("k").await.unwrap().value, "v2");
    }

    #[tokio::test]
    async fn compare_and_delete_requires_matching_index() {
        let store = InMemoryKeyValueStore::new();
        store.set(StoreNode::new("k", "v")).await.unwrap();
        let index = store.get("k").await.unwrap().index;

        let err = store.compare_and_delete_by_index(index + 1, "k").await.unwrap_err();
        assert_eq!(err, StoreError::comparison_failed("k"));

        store.compare_and_delete_by_index(index, "k").await.unwrap();
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn ttl_entries_expire_with_the_clock() {
        let clock = FakeClock::new(0);
        let store = InMemoryKeyValueStore::with_clock(clock.clone());

        store.set(StoreNode::with_ttl("/v1/domain/fresh", "", 30)).await.unwrap();
        assert!(store.get("/v1/domain/fresh").await.is_ok());

        clock.advance(Duration::from_secs(31));
        assert_eq!(
            store.get("/v1/domain/fresh").await.unwrap_err(),
            StoreError::not_found("/v1/domain/fresh")
        );
    }

    #[tokio::test]
    async fn list_respects_prefix_boundaries() {
        let store = InMemoryKeyValueStore::new();
        store.set(StoreNode::new("/v1/task/a", "1")).await.unwrap();
        store.set(StoreNode::new("/v1/task/b", "2")).await.unwrap();
        store.set(StoreNode::new("/v1/taskother/c", "3")).await.unwrap();

        let nodes = store.list_recursively("/v1/task").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].key, "/v1/task/a");
        assert_eq!(nodes[1].key, "/v1/task/b");
    }

    #[tokio::test]
    async fn list_of_absent_prefix_is_empty() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.list_recursively("/v1/desired").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_sees_create_change_delete() {
        let store = InMemoryKeyValueStore::new();
        let mut subscription = store.watch("/v1/desired").await.unwrap();

        store.set(StoreNode::new("/v1/desired/pg", "v1")).await.unwrap();
        store.set(StoreNode::new("/v1/desired/pg", "v2")).await.unwrap();
        store.delete("/v1/desired/pg").await.unwrap();

        let created = subscription.recv().await.unwrap();
        assert!(created.prev_node.is_none());
        assert_eq!(created.node.unwrap().value, "v1");

        let changed = subscription.recv().await.unwrap();
        assert_eq!(changed.prev_node.unwrap().value, "v1");
        assert_eq!(changed.node.unwrap().value, "v2");

        let deleted = subscription.recv().await.unwrap();
        assert!(deleted.node.is_none());
        assert_eq!(deleted.prev_node.unwrap().value, "v2");
    }

    #[tokio::test]
    async fn watch_ignores_keys_outside_prefix() {
        let store = InMemoryKeyValueStore::new();
        let mut subscription = store.watch("/v1/task").await.unwrap();

        store.set(StoreNode::new("/v1/desired/pg", "v")).await.unwrap();
        store.set(StoreNode::new("/v1/task/t", "v")).await.unwrap();

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.node.unwrap().key, "/v1/task/t");
    }
}
