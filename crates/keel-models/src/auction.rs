//! Payloads of fire-and-forget requests to the auctioneer.

use serde::Deserialize;
use serde::Serialize;

use crate::desired_lrp::DesiredLRP;

/// Ask the auctioneer to place instances of one desired LRP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LRPStartRequest {
    pub desired_lrp: DesiredLRP,
    pub indices: Vec<i32>,
}

impl LRPStartRequest {
    /// Request placement for a set of indices of `desired_lrp`.
    pub fn new(desired_lrp: DesiredLRP, indices: Vec<i32>) -> Self {
        Self { desired_lrp, indices }
    }

    /// Request placement for a single index.
    pub fn for_index(desired_lrp: DesiredLRP, index: i32) -> Self {
        Self {
            desired_lrp,
            indices: vec![index],
        }
    }
}
