//! The workload store façade.

use std::sync::Arc;
use std::time::Duration;

use keel_coordination::CellEventStream;
use keel_coordination::ServicesRegistry;
use keel_coordination::SessionRegistry;
use keel_core::Clock;
use keel_core::KeyValueStore;
use keel_core::schema;
use keel_models::ActualLRP;
use keel_models::ActualLRPKey;
use keel_models::DesiredLRP;
use keel_models::LRPStartRequest;
use keel_models::Task;
use tracing::error;
use tracing::info;

use crate::clients::AuctioneerClient;
use crate::clients::CellClient;
use crate::clients::TaskCallbackClient;
use crate::crash_policy::CrashPolicy;
use crate::error::Result;

/// Tunables of the convergence engines.
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    /// Unclaimed records older than this get their auction re-requested.
    pub stale_unclaimed_duration: Duration,
    /// Fan-out bound for LRP listings and convergence mutations.
    pub lrp_pool_size: usize,
    /// Fan-out bound for task CAS batches.
    pub task_pool_size: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            stale_unclaimed_duration: Duration::from_secs(30),
            lrp_pool_size: keel_core::DEFAULT_LRP_POOL_SIZE,
            task_pool_size: keel_core::DEFAULT_TASK_POOL_SIZE,
        }
    }
}

/// The shared state-plane store.
///
/// One instance serves every role: the receptor façade, per-cell reps, the
/// converger, and the auctioneer front-end each see a role-specific subset
/// of its surface (see [`crate::roles`]).
pub struct Bbs {
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) session_registry: Arc<dyn SessionRegistry>,
    pub(crate) services: ServicesRegistry,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) auctioneer_client: Arc<dyn AuctioneerClient>,
    pub(crate) cell_client: Arc<dyn CellClient>,
    pub(crate) task_callback_client: Arc<dyn TaskCallbackClient>,
    pub(crate) crash_policy: CrashPolicy,
    pub(crate) convergence: ConvergenceConfig,
}

impl Bbs {
    /// Wire a store against its collaborators.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        session_registry: Arc<dyn SessionRegistry>,
        clock: Arc<dyn Clock>,
        auctioneer_client: Arc<dyn AuctioneerClient>,
        cell_client: Arc<dyn CellClient>,
        task_callback_client: Arc<dyn TaskCallbackClient>,
    ) -> Self {
        Self {
            store,
            services: ServicesRegistry::new(session_registry.clone()),
            session_registry,
            clock,
            auctioneer_client,
            cell_client,
            task_callback_client,
            crash_policy: CrashPolicy::default(),
            convergence: ConvergenceConfig::default(),
        }
    }

    /// Override the crash policy.
    pub fn with_crash_policy(mut self, crash_policy: CrashPolicy) -> Self {
        self.crash_policy = crash_policy;
        self
    }

    /// Override the convergence tunables.
    pub fn with_convergence_config(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = convergence;
        self
    }

    /// The services view this store was wired with.
    pub fn services(&self) -> &ServicesRegistry {
        &self.services
    }

    /// Subscribe to cell appear/disappear events.
    pub async fn cell_events(&self) -> Result<CellEventStream> {
        Ok(CellEventStream::subscribe(self.session_registry.clone()).await?)
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_nanos()
    }

    /// Fetch and decode the desired LRP for a guid, with its store index.
    pub(crate) async fn fetch_desired_lrp(&self, process_guid: &str) -> Result<(DesiredLRP, u64)> {
        let node = self.store.get(&schema::desired_lrp_path(process_guid)).await?;
        let lrp = DesiredLRP::from_json(&node.value)?;
        Ok((lrp, node.index))
    }

    /// Fetch and decode the `/instance` record for a key, with its store
    /// index.
    pub(crate) async fn fetch_instance_lrp(&self, key: &ActualLRPKey) -> Result<(ActualLRP, u64)> {
        let node = self.store.get(&schema::actual_lrp_path(&key.process_guid, key.index)).await?;
        let lrp = ActualLRP::from_json(&node.value)?;
        Ok((lrp, node.index))
    }

    /// Fetch and decode the `/evacuating` record for a key, with its store
    /// index.
    pub(crate) async fn fetch_evacuating_lrp(&self, key: &ActualLRPKey) -> Result<(ActualLRP, u64)> {
        let node = self
            .store
            .get(&schema::evacuating_actual_lrp_path(&key.process_guid, key.index))
            .await?;
        let lrp = ActualLRP::from_json(&node.value)?;
        Ok((lrp, node.index))
    }

    /// Request LRP auctions; failures are logged, never surfaced.
    /// Convergence re-derives and retries the work.
    pub(crate) async fn request_lrp_auctions(&self, starts: Vec<LRPStartRequest>) {
        if starts.is_empty() {
            return;
        }

        let address = match self.services.auctioneer_address().await {
            Ok(address) => address,
            Err(err) => {
                error!(error = %err, "failed-to-find-auctioneer");
                return;
            }
        };

        info!(requests = starts.len(), "requesting-lrp-auctions");
        if let Err(err) = self.auctioneer_client.request_lrp_auctions(&address, starts).await {
            error!(error = %err, "failed-requesting-lrp-auctions");
        }
    }

    /// Request an auction for a single index of a guid, looking the desired
    /// LRP up first. Logged-only, like every auction request.
    pub(crate) async fn request_lrp_auction_for_key(&self, key: &ActualLRPKey) {
        match self.fetch_desired_lrp(&key.process_guid).await {
            Ok((desired, _)) => {
                self.request_lrp_auctions(vec![LRPStartRequest::for_index(desired, key.index)]).await;
            }
            Err(err) => {
                error!(
                    process_guid = %key.process_guid,
                    index = key.index,
                    error = %err,
                    "failed-to-fetch-desired-lrp-for-auction",
                );
            }
        }
    }

    /// Request task auctions; failures are logged, never surfaced.
    pub(crate) async fn request_task_auctions(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }

        let address = match self.services.auctioneer_address().await {
            Ok(address) => address,
            Err(err) => {
                error!(error = %err, "failed-to-find-auctioneer");
                return;
            }
        };

        info!(requests = tasks.len(), "requesting-task-auctions");
        if let Err(err) = self.auctioneer_client.request_task_auctions(&address, tasks).await {
            error!(error = %err, "failed-requesting-task-auctions");
        }
    }
}
