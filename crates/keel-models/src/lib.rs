//! Workload data model for the keel state-plane.
//!
//! Everything that is serialized into the store or exchanged with
//! role-specific clients lives here: desired and actual LRPs, tasks, action
//! trees, presence payloads, watch events, auction requests, and the
//! validation / lifecycle error taxonomy.

mod actions;
mod actual_lrp;
mod auction;
mod desired_lrp;
mod error;
mod events;
mod guid;
mod modification_tag;
mod presence;
mod task;

pub use actions::Action;
pub use actions::EnvironmentVariable;
pub use actions::ResourceLimits;
pub use actual_lrp::ActualLRP;
pub use actual_lrp::ActualLRPGroup;
pub use actual_lrp::ActualLRPInstanceKey;
pub use actual_lrp::ActualLRPKey;
pub use actual_lrp::ActualLRPNetInfo;
pub use actual_lrp::ActualLRPState;
pub use actual_lrp::PortMapping;
pub use auction::LRPStartRequest;
pub use desired_lrp::DesiredLRP;
pub use desired_lrp::DesiredLRPUpdate;
pub use desired_lrp::MAXIMUM_ANNOTATION_LENGTH;
pub use error::ModelError;
pub use events::ActualLRPChange;
pub use events::ActualLRPEvent;
pub use events::CellEvent;
pub use events::DesiredLRPChange;
pub use events::DesiredLRPEvent;
pub use modification_tag::ModificationTag;
pub use presence::AuctioneerPresence;
pub use presence::BbsPresence;
pub use presence::CellCapacity;
pub use presence::CellPresence;
pub use presence::ReceptorPresence;
pub use task::Task;
pub use task::TaskState;
