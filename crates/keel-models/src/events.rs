//! Events produced by the watch streams.

use crate::actual_lrp::ActualLRP;
use crate::desired_lrp::DesiredLRP;
use crate::presence::CellPresence;

/// Before/after pair for a modified desired LRP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredLRPChange {
    pub before: DesiredLRP,
    pub after: DesiredLRP,
}

/// A change observed on the desired-LRP subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredLRPEvent {
    Created(DesiredLRP),
    Changed(DesiredLRPChange),
    Deleted(DesiredLRP),
}

/// Before/after pair for a modified actual LRP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualLRPChange {
    pub before: ActualLRP,
    pub after: ActualLRP,
}

/// A change observed on the actual-LRP subtree.
///
/// `evacuating` is true when the event concerns the `/evacuating` record
/// rather than the authoritative `/instance` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActualLRPEvent {
    Created { lrp: ActualLRP, evacuating: bool },
    Changed { change: ActualLRPChange, evacuating: bool },
    Deleted { lrp: ActualLRP, evacuating: bool },
}

/// A change in the set of live cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellEvent {
    /// A cell presence appeared or was rewritten.
    Appeared(CellPresence),
    /// A cell presence vanished; only the id survives the deletion.
    Disappeared { cell_id: String },
}
