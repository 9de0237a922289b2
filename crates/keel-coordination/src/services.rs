//! Typed lookups over the session registry.

use std::collections::HashMap;
use std::sync::Arc;

use keel_core::StoreError;
use keel_core::schema;
use keel_models::AuctioneerPresence;
use keel_models::BbsPresence;
use keel_models::CellPresence;
use keel_models::ReceptorPresence;
use tracing::warn;

use crate::error::CoordinationError;
use crate::locks::AUCTIONEER_LOCK_NAME;
use crate::locks::BBS_MASTER_LOCK_NAME;
use crate::session::SessionRegistry;

/// Read-side view of the component presences.
///
/// All lookups are point-in-time reads of the registry; nothing is cached
/// except through [`ServicesRegistry::cells_snapshot`], which convergence
/// uses to pin one cell set for a whole pass.
#[derive(Clone)]
pub struct ServicesRegistry {
    registry: Arc<dyn SessionRegistry>,
}

impl ServicesRegistry {
    pub fn new(registry: Arc<dyn SessionRegistry>) -> Self {
        Self { registry }
    }

    /// All live cells. Malformed presences are logged and skipped.
    pub async fn cells(&self) -> Result<Vec<CellPresence>, CoordinationError> {
        let nodes = self.registry.list(schema::CELL_ROOT).await?;
        let mut cells = Vec::with_capacity(nodes.len());
        for node in nodes {
            match serde_json::from_str::<CellPresence>(&node.value) {
                Ok(cell) => cells.push(cell),
                Err(err) => {
                    warn!(key = %node.key, error = %err, "invalid-cell-presence");
                }
            }
        }
        Ok(cells)
    }

    /// The cells keyed by id, loaded once for a convergence pass.
    pub async fn cells_snapshot(&self) -> Result<CellsSnapshot, CoordinationError> {
        let cells = self.cells().await?;
        Ok(CellsSnapshot {
            cells: cells.into_iter().map(|cell| (cell.cell_id.clone(), cell)).collect(),
        })
    }

    /// Presence of one cell.
    pub async fn cell_by_id(&self, cell_id: &str) -> Result<CellPresence, CoordinationError> {
        let node = match self.registry.get(&schema::cell_path(cell_id)).await {
            Ok(node) => node,
            Err(StoreError::ResourceNotFound { .. }) => {
                return Err(CoordinationError::CellNotFound {
                    cell_id: cell_id.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        serde_json::from_str(&node.value).map_err(|err| CoordinationError::InvalidPayload {
            key: node.key,
            reason: err.to_string(),
        })
    }

    /// The active auctioneer, read from its leader lock.
    pub async fn auctioneer(&self) -> Result<AuctioneerPresence, CoordinationError> {
        self.presence_at(&schema::lock_path(AUCTIONEER_LOCK_NAME), "auctioneer").await
    }

    /// Address of the active auctioneer.
    pub async fn auctioneer_address(&self) -> Result<String, CoordinationError> {
        Ok(self.auctioneer().await?.auctioneer_address)
    }

    /// Any live receptor, for callback delivery.
    pub async fn receptor(&self) -> Result<ReceptorPresence, CoordinationError> {
        let nodes = self.registry.list(schema::RECEPTOR_ROOT).await?;
        for node in nodes {
            match serde_json::from_str::<ReceptorPresence>(&node.value) {
                Ok(receptor) => return Ok(receptor),
                Err(err) => {
                    warn!(key = %node.key, error = %err, "invalid-receptor-presence");
                }
            }
        }
        Err(CoordinationError::ServiceUnavailable { service: "receptor" })
    }

    /// URL of the elected state-plane master.
    pub async fn bbs_master_url(&self) -> Result<String, CoordinationError> {
        let presence: BbsPresence = self.presence_at(&schema::lock_path(BBS_MASTER_LOCK_NAME), "bbs").await?;
        Ok(presence.url)
    }

    async fn presence_at<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        service: &'static str,
    ) -> Result<T, CoordinationError> {
        let node = match self.registry.get(key).await {
            Ok(node) => node,
            Err(StoreError::ResourceNotFound { .. }) => {
                return Err(CoordinationError::ServiceUnavailable { service });
            }
            Err(err) => return Err(err.into()),
        };

        serde_json::from_str(&node.value).map_err(|err| CoordinationError::InvalidPayload {
            key: node.key,
            reason: err.to_string(),
        })
    }
}

/// The cell set pinned for one convergence pass.
#[derive(Debug, Clone, Default)]
pub struct CellsSnapshot {
    cells: HashMap<String, CellPresence>,
}

impl CellsSnapshot {
    /// Snapshot from an explicit cell list (tests, replays).
    pub fn from_cells(cells: Vec<CellPresence>) -> Self {
        Self {
            cells: cells.into_iter().map(|cell| (cell.cell_id.clone(), cell)).collect(),
        }
    }

    pub fn contains(&self, cell_id: &str) -> bool {
        self.cells.contains_key(cell_id)
    }

    pub fn get(&self, cell_id: &str) -> Option<&CellPresence> {
        self.cells.get(cell_id)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use keel_models::CellCapacity;

    use super::*;
    use crate::session::InMemorySessionRegistry;

    fn cell(id: &str) -> CellPresence {
        CellPresence::new(id, format!("10.0.0.1:{id}"), "lucid64", "z1", CellCapacity::default())
    }

    #[tokio::test]
    async fn cells_lists_live_presences_and_skips_garbage() {
        let registry = InMemorySessionRegistry::new();
        registry.seed("/v1/cell/cell-1", serde_json::to_string(&cell("cell-1")).unwrap());
        registry.seed("/v1/cell/cell-2", serde_json::to_string(&cell("cell-2")).unwrap());
        registry.seed("/v1/cell/cell-3", "not json");

        let services = ServicesRegistry::new(registry);
        let cells = services.cells().await.unwrap();
        assert_eq!(cells.len(), 2);

        let snapshot = services.cells_snapshot().await.unwrap();
        assert!(snapshot.contains("cell-1"));
        assert!(!snapshot.contains("cell-3"));
    }

    #[tokio::test]
    async fn cell_by_id_distinguishes_missing_from_present() {
        let registry = InMemorySessionRegistry::new();
        registry.seed("/v1/cell/cell-1", serde_json::to_string(&cell("cell-1")).unwrap());

        let services = ServicesRegistry::new(registry);
        assert_eq!(services.cell_by_id("cell-1").await.unwrap().cell_id, "cell-1");

        let err = services.cell_by_id("cell-9").await.unwrap_err();
        assert!(matches!(err, CoordinationError::CellNotFound { .. }));
    }

    #[tokio::test]
    async fn auctioneer_is_read_from_its_lock() {
        let registry = InMemorySessionRegistry::new();
        let services = ServicesRegistry::new(registry.clone());

        let err = services.auctioneer_address().await.unwrap_err();
        assert!(matches!(err, CoordinationError::ServiceUnavailable { service: "auctioneer" }));

        let presence = AuctioneerPresence::new("auctioneer-1", "http://10.0.0.2:9016");
        registry.seed("/v1/locks/auctioneer_lock", serde_json::to_string(&presence).unwrap());
        assert_eq!(services.auctioneer_address().await.unwrap(), "http://10.0.0.2:9016");
    }

    #[tokio::test]
    async fn receptor_returns_any_live_instance() {
        let registry = InMemorySessionRegistry::new();
        let services = ServicesRegistry::new(registry.clone());

        let err = services.receptor().await.unwrap_err();
        assert!(matches!(err, CoordinationError::ServiceUnavailable { service: "receptor" }));

        let presence = ReceptorPresence::new("receptor-1", "http://receptor.example.com");
        registry.seed("/v1/receptor/receptor-1", serde_json::to_string(&presence).unwrap());
        assert_eq!(services.receptor().await.unwrap().receptor_url, "http://receptor.example.com");
    }
}
