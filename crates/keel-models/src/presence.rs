//! Payloads of the ephemeral entries in the session registry.
//!
//! Each of these is written under a session-bound key; deletion of the key
//! signals liveness loss for the component it describes.

use serde::Deserialize;
use serde::Serialize;

use crate::error::ModelError;

/// Advertised capacity of a cell.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellCapacity {
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub containers: i32,
}

/// A worker host available to run containers, at `/v1/cell/<cell_id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellPresence {
    pub cell_id: String,
    pub rep_address: String,
    pub stack: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(default)]
    pub capacity: CellCapacity,
}

impl CellPresence {
    pub fn new(
        cell_id: impl Into<String>,
        rep_address: impl Into<String>,
        stack: impl Into<String>,
        zone: impl Into<String>,
        capacity: CellCapacity,
    ) -> Self {
        Self {
            cell_id: cell_id.into(),
            rep_address: rep_address.into(),
            stack: stack.into(),
            zone: zone.into(),
            capacity,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.cell_id.is_empty() {
            return Err(ModelError::invalid_field("cell_id"));
        }
        if self.rep_address.is_empty() {
            return Err(ModelError::invalid_field("rep_address"));
        }
        if self.stack.is_empty() {
            return Err(ModelError::invalid_field("stack"));
        }
        Ok(())
    }
}

/// The active placement scheduler, at its well-known lock path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuctioneerPresence {
    pub auctioneer_id: String,
    pub auctioneer_address: String,
}

impl AuctioneerPresence {
    pub fn new(auctioneer_id: impl Into<String>, auctioneer_address: impl Into<String>) -> Self {
        Self {
            auctioneer_id: auctioneer_id.into(),
            auctioneer_address: auctioneer_address.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.auctioneer_id.is_empty() {
            return Err(ModelError::invalid_field("auctioneer_id"));
        }
        if self.auctioneer_address.is_empty() {
            return Err(ModelError::invalid_field("auctioneer_address"));
        }
        Ok(())
    }
}

/// An API façade instance, at `/v1/receptor/<receptor_id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceptorPresence {
    pub receptor_id: String,
    pub receptor_url: String,
}

impl ReceptorPresence {
    pub fn new(receptor_id: impl Into<String>, receptor_url: impl Into<String>) -> Self {
        Self {
            receptor_id: receptor_id.into(),
            receptor_url: receptor_url.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.receptor_id.is_empty() {
            return Err(ModelError::invalid_field("receptor_id"));
        }
        if self.receptor_url.is_empty() {
            return Err(ModelError::invalid_field("receptor_url"));
        }
        Ok(())
    }
}

/// The elected state-plane master, at its well-known lock path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BbsPresence {
    pub id: String,
    pub url: String,
}

impl BbsPresence {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}
