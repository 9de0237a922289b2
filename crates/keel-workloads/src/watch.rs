//! Watch streams over the desired and actual subtrees.
//!
//! Each stream is a lazy, cancel-able sequence decoded from the raw store
//! watch. Undecodable payloads are logged and skipped, never pruned here.
//! The stream ends when the store watch terminates; reconnecting is the
//! consumer's job.

use keel_core::WatchEvent;
use keel_core::schema;
use keel_models::ActualLRP;
use keel_models::ActualLRPChange;
use keel_models::ActualLRPEvent;
use keel_models::DesiredLRP;
use keel_models::DesiredLRPChange;
use keel_models::DesiredLRPEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::actual_lrp::parse_actual_lrp_key;
use crate::bbs::Bbs;
use crate::error::Result;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Live stream of decoded watch events.
pub struct EventStream<T> {
    events: mpsc::Receiver<T>,
    decoder: JoinHandle<()>,
}

impl<T> EventStream<T> {
    /// Next event; `None` when the stream has ended.
    pub async fn next(&mut self) -> Option<T> {
        self.events.recv().await
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.decoder.abort();
    }
}

fn decode_desired_event(event: WatchEvent) -> Option<DesiredLRPEvent> {
    let decode = |value: &str, key: &str| match DesiredLRP::from_json(value) {
        Ok(lrp) => Some(lrp),
        Err(err) => {
            warn!(key = %key, error = %err, "failed-to-decode-desired-lrp-event");
            None
        }
    };

    match (event.node, event.prev_node) {
        (Some(node), None) => Some(DesiredLRPEvent::Created(decode(&node.value, &node.key)?)),
        (Some(node), Some(prev)) => Some(DesiredLRPEvent::Changed(DesiredLRPChange {
            before: decode(&prev.value, &prev.key)?,
            after: decode(&node.value, &node.key)?,
        })),
        (None, Some(prev)) => Some(DesiredLRPEvent::Deleted(decode(&prev.value, &prev.key)?)),
        (None, None) => None,
    }
}

fn decode_actual_event(event: WatchEvent) -> Option<ActualLRPEvent> {
    let key = event
        .node
        .as_ref()
        .or(event.prev_node.as_ref())
        .map(|node| node.key.clone())?;
    let (_, _, evacuating) = parse_actual_lrp_key(&key)?;

    let decode = |value: &str| match ActualLRP::from_json(value) {
        Ok(lrp) => Some(lrp),
        Err(err) => {
            warn!(key = %key, error = %err, "failed-to-decode-actual-lrp-event");
            None
        }
    };

    match (event.node, event.prev_node) {
        (Some(node), None) => Some(ActualLRPEvent::Created {
            lrp: decode(&node.value)?,
            evacuating,
        }),
        (Some(node), Some(prev)) => Some(ActualLRPEvent::Changed {
            change: ActualLRPChange {
                before: decode(&prev.value)?,
                after: decode(&node.value)?,
            },
            evacuating,
        }),
        (None, Some(prev)) => Some(ActualLRPEvent::Deleted {
            lrp: decode(&prev.value)?,
            evacuating,
        }),
        (None, None) => None,
    }
}

impl Bbs {
    /// Stream of created/changed/deleted desired LRPs.
    pub async fn watch_for_desired_lrp_changes(&self) -> Result<EventStream<DesiredLRPEvent>> {
        let mut subscription = self.store.watch(schema::DESIRED_LRP_ROOT).await?;
        let (sender, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let decoder = tokio::spawn(async move {
            while let Some(raw) = subscription.recv().await {
                if let Some(event) = decode_desired_event(raw) {
                    if sender.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(EventStream { events, decoder })
    }

    /// Stream of created/changed/deleted actual LRPs, with an `evacuating`
    /// marker distinguishing the two records of a group.
    pub async fn watch_for_actual_lrp_changes(&self) -> Result<EventStream<ActualLRPEvent>> {
        let mut subscription = self.store.watch(schema::ACTUAL_LRP_ROOT).await?;
        let (sender, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let decoder = tokio::spawn(async move {
            while let Some(raw) = subscription.recv().await {
                if let Some(event) = decode_actual_event(raw) {
                    if sender.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(EventStream { events, decoder })
    }
}
