//! Heartbeated session-bound keys: presences and leader locks.
//!
//! One runner serves both interpretations. A *presence* announces a
//! component at a key nobody else contends for (cells, receptors); a *lock*
//! is the same machinery on a contended well-known key, where holding the
//! key is leadership. The runner keeps the key alive across session loss by
//! recreating the session and re-asserting the key.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::error::CoordinationError;
use crate::session::Session;
use crate::session::SessionRegistry;

/// Configuration of one presence or lock runner.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Registry key to assert.
    pub key: String,
    /// Payload bound to the key (JSON for typed presences).
    pub value: String,
    /// Session TTL; the registry drops the key this long after the session
    /// stops heartbeating.
    pub session_ttl_seconds: u64,
    /// Delay before recreating a session after loss or failure.
    pub retry_interval: Duration,
}

/// A spawned presence/lock runner.
pub struct Presence {
    registry: Arc<dyn SessionRegistry>,
    config: PresenceConfig,
}

impl std::fmt::Debug for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presence")
            .field("config", &self.config)
            .finish()
    }
}

impl Presence {
    /// Create a runner; nothing happens until [`Presence::spawn`].
    pub fn new(registry: Arc<dyn SessionRegistry>, config: PresenceConfig) -> Self {
        Self { registry, config }
    }

    /// Start the runner on the current tokio runtime.
    ///
    /// The handle's readiness fires as soon as the first assertion attempt
    /// has been dispatched; callers may proceed but must not assume the key
    /// is visible in the registry yet.
    pub fn spawn(self) -> PresenceHandle {
        let (ready_tx, ready_rx) = watch::channel(false);
        let (held_tx, held_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let key = self.config.key.clone();
        let task = tokio::spawn(run_presence(self.registry, self.config, ready_tx, held_tx, shutdown_rx));

        PresenceHandle {
            key,
            ready_rx,
            held_rx,
            shutdown_tx,
            task: Some(task),
        }
    }
}

/// Handle to a running presence/lock.
pub struct PresenceHandle {
    key: String,
    ready_rx: watch::Receiver<bool>,
    held_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PresenceHandle {
    /// Key this runner asserts.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait until the first assertion attempt has been dispatched.
    pub async fn ready(&mut self) {
        while !*self.ready_rx.borrow() {
            if self.ready_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// True while the key is believed held by this runner.
    pub fn is_held(&self) -> bool {
        *self.held_rx.borrow()
    }

    /// Subscribe to hold/release transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.held_rx.clone()
    }

    /// Wait until the key is held (leadership acquired).
    pub async fn wait_until_held(&mut self) {
        while !*self.held_rx.borrow() {
            if self.held_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Signal shutdown and wait for session destruction to complete.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        // Best effort; the task notices on its next wakeup.
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_presence(
    registry: Arc<dyn SessionRegistry>,
    config: PresenceConfig,
    ready_tx: watch::Sender<bool>,
    held_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(key = %config.key, "presence-starting");

    let mut session: Option<Arc<dyn Session>> = None;

    loop {
        // (Re)create a session if the previous one is gone.
        let current = match &session {
            Some(current) => current.clone(),
            None => match registry.create_session(config.session_ttl_seconds).await {
                Ok(created) => {
                    session = Some(created.clone());
                    created
                }
                Err(err) => {
                    error!(key = %config.key, error = %err, "failed-creating-session");
                    let _ = ready_tx.send(true);
                    if wait_retry(&config, &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            },
        };

        debug!(key = %config.key, "setting-presence");
        let set_result = current.set_presence(&config.key, config.value.clone()).await;
        let _ = ready_tx.send(true);

        match set_result {
            Ok(mut lost_rx) => {
                info!(key = %config.key, "succeeded-setting-presence");
                let _ = held_tx.send(true);

                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                    changed = lost_rx.changed() => {
                        match changed {
                            Ok(()) if !*lost_rx.borrow() => continue,
                            _ => {
                                info!(key = %config.key, "presence-lost");
                                let _ = held_tx.send(false);
                                session = None;
                                if wait_retry(&config, &mut shutdown_rx).await {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(CoordinationError::PresenceHeld { holder, .. }) => {
                debug!(key = %config.key, holder = %holder, "presence-held-elsewhere");
                let _ = held_tx.send(false);
                if wait_retry(&config, &mut shutdown_rx).await {
                    break;
                }
            }
            Err(err) => {
                error!(key = %config.key, error = %err, "failed-setting-presence");
                let _ = held_tx.send(false);
                session = None;
                if wait_retry(&config, &mut shutdown_rx).await {
                    break;
                }
            }
        }
    }

    // Shutdown: destroy the session before returning so the key is removed
    // promptly rather than waiting out the TTL.
    info!(key = %config.key, "presence-shutting-down");
    let _ = held_tx.send(false);
    if let Some(current) = session {
        current.destroy().await;
    }
    info!(key = %config.key, "presence-done");
}

/// Sleep for the retry interval; returns true if shutdown fired first.
async fn wait_retry(config: &PresenceConfig, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => true,
        _ = tokio::time::sleep(config.retry_interval) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::InMemorySessionRegistry;

    fn config(key: &str, value: &str) -> PresenceConfig {
        PresenceConfig {
            key: key.to_string(),
            value: value.to_string(),
            session_ttl_seconds: 10,
            retry_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn presence_appears_in_registry() {
        let registry = InMemorySessionRegistry::new();
        let presence = Presence::new(registry.clone(), config("/v1/cell/cell-1", "payload"));

        let mut handle = presence.spawn();
        handle.ready().await;
        handle.wait_until_held().await;

        assert_eq!(registry.get("/v1/cell/cell-1").await.unwrap().value, "payload");
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_destroys_the_session_and_removes_the_key() {
        let registry = InMemorySessionRegistry::new();
        let presence = Presence::new(registry.clone(), config("/v1/cell/cell-1", "payload"));

        let mut handle = presence.spawn();
        handle.wait_until_held().await;
        handle.stop().await;

        assert!(registry.get("/v1/cell/cell-1").await.is_err());
    }

    #[tokio::test]
    async fn presence_reacquires_after_session_loss() {
        let registry = InMemorySessionRegistry::new();
        let presence = Presence::new(registry.clone(), config("/v1/cell/cell-1", "payload"));

        let mut handle = presence.spawn();
        handle.wait_until_held().await;

        registry.expire_session(1);
        assert!(registry.get("/v1/cell/cell-1").await.is_err());

        // The runner recreates a session after the retry interval.
        let mut held = handle.subscribe();
        while !*held.borrow() {
            held.changed().await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if registry.get("/v1/cell/cell-1").await.is_ok() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("presence should be re-asserted");

        handle.stop().await;
    }

    #[tokio::test]
    async fn contended_lock_has_one_holder_and_fails_over() {
        let registry = InMemorySessionRegistry::new();

        let mut first = Presence::new(registry.clone(), config("/v1/locks/converge_lock", "converger-1")).spawn();
        first.wait_until_held().await;

        let second = Presence::new(registry.clone(), config("/v1/locks/converge_lock", "converger-2")).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(first.is_held());
        assert!(!second.is_held());
        assert_eq!(registry.get("/v1/locks/converge_lock").await.unwrap().value, "converger-1");

        // First holder shuts down; second takes over.
        first.stop().await;
        let mut second = second;
        tokio::time::timeout(Duration::from_secs(1), second.wait_until_held())
            .await
            .expect("second candidate should acquire the lock");
        assert_eq!(registry.get("/v1/locks/converge_lock").await.unwrap().value, "converger-2");

        second.stop().await;
    }

    #[tokio::test]
    async fn ready_fires_even_when_the_key_is_contended() {
        let registry = InMemorySessionRegistry::new();

        let mut first = Presence::new(registry.clone(), config("/v1/locks/l", "one")).spawn();
        first.wait_until_held().await;

        let mut second = Presence::new(registry.clone(), config("/v1/locks/l", "two")).spawn();
        tokio::time::timeout(Duration::from_millis(200), second.ready())
            .await
            .expect("ready should fire without holding the key");
        assert!(!second.is_held());

        first.stop().await;
        second.stop().await;
    }
}
