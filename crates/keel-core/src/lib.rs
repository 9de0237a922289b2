//! Storage substrate for the keel state-plane.
//!
//! This crate provides the foundations every other keel crate builds on:
//!
//! - **Traits**: [`KeyValueStore`], [`Clock`]
//! - **Types**: [`StoreNode`], [`WatchEvent`], [`StoreError`]
//! - **Schema**: the stable `/v1/...` path layout consumed by all clients
//! - **Helpers**: timeout retry, bounded [`WorkPool`] fan-out
//! - **Test support**: [`InMemoryKeyValueStore`], [`FakeClock`]
//!
//! The in-memory store is a public module (not test-gated) so downstream
//! crates can drive their own tests against a deterministic backend.

mod clock;
mod error;
pub mod memory;
mod node;
mod retry;
pub mod schema;
mod store;
mod work_pool;

pub use clock::Clock;
pub use clock::FakeClock;
pub use clock::SystemClock;
pub use clock::nanos_since;
pub use error::StoreError;
pub use memory::InMemoryKeyValueStore;
pub use node::StoreNode;
pub use node::WatchEvent;
pub use retry::retry_on_timeout;
pub use store::KeyValueStore;
pub use store::WatchSubscription;
pub use work_pool::DEFAULT_LRP_POOL_SIZE;
pub use work_pool::DEFAULT_TASK_POOL_SIZE;
pub use work_pool::WorkPool;
