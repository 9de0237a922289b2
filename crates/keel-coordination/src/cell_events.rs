//! Appear/disappear events for the cell set.

use std::sync::Arc;

use keel_core::schema;
use keel_models::CellEvent;
use keel_models::CellPresence;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::CoordinationError;
use crate::session::SessionRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lazy stream of [`CellEvent`]s derived from watching `/v1/cell`.
///
/// The stream ends when the underlying registry watch terminates; consumers
/// restart it by subscribing again.
pub struct CellEventStream {
    events: mpsc::Receiver<CellEvent>,
    decoder: JoinHandle<()>,
}

impl CellEventStream {
    /// Subscribe to cell appearances and disappearances.
    pub async fn subscribe(registry: Arc<dyn SessionRegistry>) -> Result<Self, CoordinationError> {
        let mut subscription = registry.watch(schema::CELL_ROOT).await?;
        let (sender, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let decoder = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let decoded = match (&event.node, &event.prev_node) {
                    (Some(node), _) => match serde_json::from_str::<CellPresence>(&node.value) {
                        Ok(cell) => CellEvent::Appeared(cell),
                        Err(err) => {
                            warn!(key = %node.key, error = %err, "invalid-cell-presence-in-event");
                            continue;
                        }
                    },
                    (None, Some(prev)) => CellEvent::Disappeared {
                        cell_id: schema::base_name(&prev.key).to_string(),
                    },
                    (None, None) => continue,
                };

                if sender.send(decoded).await.is_err() {
                    return;
                }
            }
        });

        Ok(Self { events, decoder })
    }

    /// Next event; `None` when the stream has ended.
    pub async fn next(&mut self) -> Option<CellEvent> {
        self.events.recv().await
    }
}

impl Drop for CellEventStream {
    fn drop(&mut self) {
        self.decoder.abort();
    }
}
