//! Workload stores and convergence for the keel state-plane.
//!
//! The [`Bbs`] struct is the shared core every role-specific client calls
//! into: desired/actual LRP stores, the task store, the evacuation
//! protocol, domain freshness, and the two convergence engines. Outbound
//! collaborators (auctioneer, cells, receptors) are reached through the
//! client traits in [`clients`]; the data plane is a
//! [`keel_core::KeyValueStore`]; liveness comes from `keel-coordination`.

mod actual_lrp;
mod bbs;
pub mod clients;
mod crash_policy;
mod desired_lrp;
mod domain;
mod error;
mod evacuation;
mod lrp_convergence;
pub mod metrics;
mod roles;
mod task;
mod task_convergence;
pub mod test_support;
mod watch;

pub use bbs::Bbs;
pub use bbs::ConvergenceConfig;
pub use clients::AuctioneerClient;
pub use clients::CellClient;
pub use clients::TaskCallbackClient;
pub use crash_policy::CrashPolicy;
pub use error::BbsError;
pub use error::Result;
pub use evacuation::ContainerRetainment;
pub use lrp_convergence::ConvergenceChanges;
pub use lrp_convergence::ConvergenceInput;
pub use roles::AuctioneerApi;
pub use roles::ConvergerApi;
pub use roles::ReceptorApi;
pub use roles::RepApi;
pub use task::TASK_CANCELLED_REASON;
pub use task::TASK_CELL_DISAPPEARED_REASON;
pub use task::TASK_EXPIRED_REASON;
pub use watch::EventStream;
