//! The session-based liveness registry.
//!
//! Unlike the data-plane KV store, entries here are bound to sessions: when
//! a session dies (explicit destroy, TTL expiry, or registry-side loss) its
//! keys vanish, which is how the cluster observes liveness loss. The
//! registry is read by consumers through plain get/list/watch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use keel_core::StoreError;
use keel_core::StoreNode;
use keel_core::WatchEvent;
use keel_core::WatchSubscription;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::error::CoordinationError;

/// Watch channel signalling session loss; flips to `true` exactly once.
pub type SessionLost = watch::Receiver<bool>;

/// A live session. Keys written through it vanish when it ends.
#[async_trait]
pub trait Session: Send + Sync {
    /// Bind `value` to `key` under this session.
    ///
    /// Fails with [`CoordinationError::PresenceHeld`] when another live
    /// session already holds the key. Returns a channel that flips to `true`
    /// if the session is lost by the registry.
    async fn set_presence(&self, key: &str, value: String) -> Result<SessionLost, CoordinationError>;

    /// End the session, promptly removing every key it holds.
    async fn destroy(&self);
}

/// The session-based registry the presence layer runs against.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Open a new session with the given TTL.
    async fn create_session(&self, ttl_seconds: u64) -> Result<Arc<dyn Session>, CoordinationError>;

    /// Read one entry.
    async fn get(&self, key: &str) -> Result<StoreNode, StoreError>;

    /// List entries under a prefix; an absent prefix yields an empty list.
    async fn list(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError>;

    /// Subscribe to changes under a prefix.
    async fn watch(&self, prefix: &str) -> Result<WatchSubscription, StoreError>;
}

const WATCH_CHANNEL_CAPACITY: usize = 256;

struct KeyEntry {
    value: String,
    session_id: u64,
}

struct SessionState {
    lost_tx: watch::Sender<bool>,
}

struct Watcher {
    prefix: String,
    sender: mpsc::Sender<WatchEvent>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<u64, SessionState>,
    keys: HashMap<String, KeyEntry>,
    watchers: Vec<Watcher>,
}

impl RegistryState {
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

    fn remove_session(&mut self, session_id: u64, lost: bool) {
        let removed: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, entry)| entry.session_id == session_id)
            .map(|(key, _)| key.clone())
            .collect();

        for key in removed {
            if let Some(entry) = self.keys.remove(&key) {
                self.notify(WatchEvent::deleted(StoreNode::new(key, entry.value)));
            }
        }

        if let Some(session) = self.sessions.remove(&session_id) {
            if lost {
                let _ = session.lost_tx.send(true);
            }
        }
    }
}

fn key_in_prefix(key: &str, prefix: &str) -> bool {
    key == prefix || key.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

/// In-memory [`SessionRegistry`] for tests.
///
/// Sessions never expire on their own; tests force registry-side loss with
/// [`InMemorySessionRegistry::expire_session`].
#[derive(Default)]
pub struct InMemorySessionRegistry {
    state: Arc<Mutex<RegistryState>>,
    next_session_id: AtomicU64,
}

impl InMemorySessionRegistry {
    /// Create a registry wrapped in `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate registry-side session loss: the session's keys vanish and
    /// its loss channel fires.
    pub fn expire_session(&self, session_id: u64) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.remove_session(session_id, true);
    }

    /// Write a presence entry without a backing session (test seeding).
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = key.into();
        let value = value.into();
        let prev = state.keys.insert(key.clone(), KeyEntry {
            value: value.clone(),
            session_id: 0,
        });
        let node = StoreNode::new(key.clone(), value);
        let event = match prev {
            Some(old) => WatchEvent::changed(StoreNode::new(key, old.value), node),
            None => WatchEvent::created(node),
        };
        state.notify(event);
    }

    /// Remove an entry regardless of session (test seeding).
    pub fn remove(&self, key: &str) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = state.keys.remove(key) {
            state.notify(WatchEvent::deleted(StoreNode::new(key, entry.value)));
        }
    }
}

/// Handle to a session in an [`InMemorySessionRegistry`].
pub struct InMemorySession {
    id: u64,
    state: Arc<Mutex<RegistryState>>,
    lost_rx: SessionLost,
}

impl InMemorySession {
    /// Registry-assigned session id, used with `expire_session` in tests.
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn create_session(&self, _ttl_seconds: u64) -> Result<Arc<dyn Session>, CoordinationError> {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (lost_tx, lost_rx) = watch::channel(false);

        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.sessions.insert(id, SessionState { lost_tx });

        Ok(Arc::new(InMemorySession {
            id,
            state: self.state.clone(),
            lost_rx,
        }))
    }

    async fn get(&self, key: &str) -> Result<StoreNode, StoreError> {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match state.keys.get(key) {
            Some(entry) => Ok(StoreNode::new(key, entry.value.clone())),
            None => Err(StoreError::not_found(key)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut nodes: Vec<StoreNode> = state
            .keys
            .iter()
            .filter(|(key, _)| key_in_prefix(key, prefix))
            .map(|(key, entry)| StoreNode::new(key.clone(), entry.value.clone()))
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    async fn watch(&self, prefix: &str) -> Result<WatchSubscription, StoreError> {
        let (sender, receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(WatchSubscription::new(receiver))
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn set_presence(&self, key: &str, value: String) -> Result<SessionLost, CoordinationError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !state.sessions.contains_key(&self.id) {
            return Err(CoordinationError::SessionFailed {
                reason: format!("session {} is gone", self.id),
            });
        }

        if let Some(existing) = state.keys.get(key) {
            if existing.session_id != self.id && state.sessions.contains_key(&existing.session_id) {
                return Err(CoordinationError::PresenceHeld {
                    key: key.to_string(),
                    holder: existing.value.clone(),
                });
            }
        }

        let prev = state.keys.insert(key.to_string(), KeyEntry {
            value: value.clone(),
            session_id: self.id,
        });
        let node = StoreNode::new(key, value);
        let event = match prev {
            Some(old) => WatchEvent::changed(StoreNode::new(key, old.value), node),
            None => WatchEvent::created(node),
        };
        state.notify(event);

        Ok(self.lost_rx.clone())
    }

    async fn destroy(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.remove_session(self.id, false);
    }
}
