//! Liveness layer of the keel state-plane.
//!
//! Built on a session-based registry (an external collaborator reached
//! through [`SessionRegistry`]):
//!
//! - [`Presence`]: a heartbeated session-bound key, recreated on loss
//! - well-known locks: the same machinery read as leader election
//! - [`ServicesRegistry`]: typed lookups of cells, auctioneer, receptor
//! - [`CellEventStream`]: appear/disappear events for the cell set

mod cell_events;
mod error;
mod locks;
mod presence;
mod services;
pub mod session;

pub use cell_events::CellEventStream;
pub use error::CoordinationError;
pub use locks::AUCTIONEER_LOCK_NAME;
pub use locks::BBS_MASTER_LOCK_NAME;
pub use locks::CONVERGE_LOCK_NAME;
pub use locks::DEFAULT_SESSION_TTL_SECONDS;
pub use locks::NSYNC_BULKER_LOCK_NAME;
pub use locks::ROUTE_EMITTER_LOCK_NAME;
pub use locks::RUNTIME_METRICS_LOCK_NAME;
pub use locks::new_auctioneer_lock;
pub use locks::new_bbs_master_lock;
pub use locks::new_cell_presence;
pub use locks::new_converge_lock;
pub use locks::new_nsync_bulker_lock;
pub use locks::new_receptor_presence;
pub use locks::new_route_emitter_lock;
pub use locks::new_runtime_metrics_lock;
pub use presence::Presence;
pub use presence::PresenceConfig;
pub use presence::PresenceHandle;
pub use services::CellsSnapshot;
pub use services::ServicesRegistry;
pub use session::InMemorySessionRegistry;
pub use session::Session;
pub use session::SessionLost;
pub use session::SessionRegistry;
