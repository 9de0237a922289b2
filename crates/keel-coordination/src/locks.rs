//! Well-known locks and presences.
//!
//! Each constructor binds a typed payload to a fixed registry path. The
//! lock variants are leader elections: the component that holds the key is
//! the active one, everybody else retries in the background.

use std::sync::Arc;
use std::time::Duration;

use keel_core::schema;
use keel_models::AuctioneerPresence;
use keel_models::BbsPresence;
use keel_models::CellPresence;
use keel_models::ModelError;
use keel_models::ReceptorPresence;

use crate::presence::Presence;
use crate::presence::PresenceConfig;
use crate::session::SessionRegistry;

/// Lock name of the active converger.
pub const CONVERGE_LOCK_NAME: &str = "converge_lock";
/// Lock name of the active auctioneer.
pub const AUCTIONEER_LOCK_NAME: &str = "auctioneer_lock";
/// Lock name of the active route emitter.
pub const ROUTE_EMITTER_LOCK_NAME: &str = "route_emitter_lock";
/// Lock name of the active state-plane master.
pub const BBS_MASTER_LOCK_NAME: &str = "bbs_lock";
/// Lock name of the active desired-state bulker.
pub const NSYNC_BULKER_LOCK_NAME: &str = "nsync_bulker_lock";
/// Lock name of the active runtime-metrics emitter.
pub const RUNTIME_METRICS_LOCK_NAME: &str = "runtime_metrics_lock";

/// Session TTL used by every well-known lock and presence.
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 15;

fn lock(registry: Arc<dyn SessionRegistry>, name: &str, value: String, retry_interval: Duration) -> Presence {
    Presence::new(registry, PresenceConfig {
        key: schema::lock_path(name),
        value,
        session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        retry_interval,
    })
}

/// Leader lock for the converger; the holder runs convergence passes.
pub fn new_converge_lock(registry: Arc<dyn SessionRegistry>, converger_id: &str, retry_interval: Duration) -> Presence {
    lock(registry, CONVERGE_LOCK_NAME, converger_id.to_string(), retry_interval)
}

/// Leader lock for the auctioneer, carrying its address for lookups.
pub fn new_auctioneer_lock(
    registry: Arc<dyn SessionRegistry>,
    presence: &AuctioneerPresence,
    retry_interval: Duration,
) -> Result<Presence, ModelError> {
    presence.validate()?;
    let value = serde_json::to_string(presence).map_err(ModelError::from)?;
    Ok(lock(registry, AUCTIONEER_LOCK_NAME, value, retry_interval))
}

/// Leader lock for the route emitter.
pub fn new_route_emitter_lock(registry: Arc<dyn SessionRegistry>, emitter_id: &str, retry_interval: Duration) -> Presence {
    lock(registry, ROUTE_EMITTER_LOCK_NAME, emitter_id.to_string(), retry_interval)
}

/// Leader lock for the state-plane master, carrying its URL.
pub fn new_bbs_master_lock(
    registry: Arc<dyn SessionRegistry>,
    presence: &BbsPresence,
    retry_interval: Duration,
) -> Result<Presence, ModelError> {
    let value = serde_json::to_string(presence).map_err(ModelError::from)?;
    Ok(lock(registry, BBS_MASTER_LOCK_NAME, value, retry_interval))
}

/// Leader lock for the desired-state bulker.
pub fn new_nsync_bulker_lock(registry: Arc<dyn SessionRegistry>, bulker_id: &str, retry_interval: Duration) -> Presence {
    lock(registry, NSYNC_BULKER_LOCK_NAME, bulker_id.to_string(), retry_interval)
}

/// Leader lock for the runtime-metrics emitter.
pub fn new_runtime_metrics_lock(registry: Arc<dyn SessionRegistry>, emitter_id: &str, retry_interval: Duration) -> Presence {
    lock(registry, RUNTIME_METRICS_LOCK_NAME, emitter_id.to_string(), retry_interval)
}

/// Heartbeated presence of a cell at `/v1/cell/<cell_id>`.
pub fn new_cell_presence(
    registry: Arc<dyn SessionRegistry>,
    presence: &CellPresence,
    retry_interval: Duration,
) -> Result<Presence, ModelError> {
    presence.validate()?;
    let value = serde_json::to_string(presence).map_err(ModelError::from)?;
    Ok(Presence::new(registry, PresenceConfig {
        key: schema::cell_path(&presence.cell_id),
        value,
        session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        retry_interval,
    }))
}

/// Heartbeated presence of a receptor at `/v1/receptor/<receptor_id>`.
pub fn new_receptor_presence(
    registry: Arc<dyn SessionRegistry>,
    presence: &ReceptorPresence,
    retry_interval: Duration,
) -> Result<Presence, ModelError> {
    presence.validate()?;
    let value = serde_json::to_string(presence).map_err(ModelError::from)?;
    Ok(Presence::new(registry, PresenceConfig {
        key: schema::receptor_path(&presence.receptor_id),
        value,
        session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        retry_interval,
    }))
}
