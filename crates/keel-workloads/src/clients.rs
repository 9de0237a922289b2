//! Outbound client seams.
//!
//! The core never waits on these collaborators: auction requests, stop and
//! cancel RPCs, and callback delivery are fire-and-forget. Failures are
//! logged by the callers and re-derived by convergence. Wire
//! implementations (HTTP POST, 202-accepted contract) live with the
//! transport layer, outside this workspace.

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use keel_models::ActualLRPInstanceKey;
use keel_models::ActualLRPKey;
use keel_models::LRPStartRequest;
use keel_models::Task;

/// Requests placement decisions from the active auctioneer.
#[async_trait]
pub trait AuctioneerClient: Send + Sync {
    /// Ask for LRP instances to be placed.
    async fn request_lrp_auctions(&self, auctioneer_url: &str, starts: Vec<LRPStartRequest>) -> anyhow::Result<()>;

    /// Ask for tasks to be placed.
    async fn request_task_auctions(&self, auctioneer_url: &str, tasks: Vec<Task>) -> anyhow::Result<()>;
}

/// Talks to the rep on a cell.
#[async_trait]
pub trait CellClient: Send + Sync {
    /// Tell the cell to tear down one LRP instance; the cell confirms by
    /// removing the record afterwards.
    async fn stop_lrp_instance(
        &self,
        rep_address: &str,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> anyhow::Result<()>;

    /// Tell the cell to abort an in-flight task.
    async fn cancel_task(&self, rep_address: &str, task_guid: &str) -> anyhow::Result<()>;
}

/// Delivers completed tasks to a receptor's callback handler.
#[async_trait]
pub trait TaskCallbackClient: Send + Sync {
    /// Post a batch of completed tasks.
    async fn complete_tasks(&self, receptor_url: &str, tasks: Vec<Task>) -> anyhow::Result<()>;
}

/// Recording [`AuctioneerClient`] for tests.
#[derive(Default)]
pub struct FakeAuctioneerClient {
    lrp_requests: Mutex<Vec<(String, Vec<LRPStartRequest>)>>,
    task_requests: Mutex<Vec<(String, Vec<Task>)>>,
    fail: AtomicBool,
}

impl FakeAuctioneerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent request fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Recorded LRP auction requests, in call order.
    pub fn lrp_requests(&self) -> Vec<(String, Vec<LRPStartRequest>)> {
        self.lrp_requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// All requested (process_guid, index) pairs across every call.
    pub fn requested_indices(&self) -> Vec<(String, i32)> {
        self.lrp_requests()
            .into_iter()
            .flat_map(|(_, starts)| starts)
            .flat_map(|start| {
                let guid = start.desired_lrp.process_guid.clone();
                start.indices.into_iter().map(move |index| (guid.clone(), index))
            })
            .collect()
    }

    /// Recorded task auction requests, in call order.
    pub fn task_requests(&self) -> Vec<(String, Vec<Task>)> {
        self.task_requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Forget every recorded request.
    pub fn clear(&self) {
        self.lrp_requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        self.task_requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

#[async_trait]
impl AuctioneerClient for FakeAuctioneerClient {
    async fn request_lrp_auctions(&self, auctioneer_url: &str, starts: Vec<LRPStartRequest>) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("auctioneer unreachable");
        }
        self.lrp_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((auctioneer_url.to_string(), starts));
        Ok(())
    }

    async fn request_task_auctions(&self, auctioneer_url: &str, tasks: Vec<Task>) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("auctioneer unreachable");
        }
        self.task_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((auctioneer_url.to_string(), tasks));
        Ok(())
    }
}

/// Recording [`CellClient`] for tests.
#[derive(Default)]
pub struct FakeCellClient {
    stops: Mutex<Vec<(String, ActualLRPKey, ActualLRPInstanceKey)>>,
    cancels: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl FakeCellClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Recorded stop requests as (rep_address, key, instance_key).
    pub fn stops(&self) -> Vec<(String, ActualLRPKey, ActualLRPInstanceKey)> {
        self.stops.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Recorded cancellations as (rep_address, task_guid).
    pub fn cancels(&self) -> Vec<(String, String)> {
        self.cancels.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl CellClient for FakeCellClient {
    async fn stop_lrp_instance(
        &self,
        rep_address: &str,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("cell unreachable");
        }
        self.stops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((rep_address.to_string(), key.clone(), instance_key.clone()));
        Ok(())
    }

    async fn cancel_task(&self, rep_address: &str, task_guid: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("cell unreachable");
        }
        self.cancels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((rep_address.to_string(), task_guid.to_string()));
        Ok(())
    }
}

/// Recording [`TaskCallbackClient`] for tests.
#[derive(Default)]
pub struct FakeTaskCallbackClient {
    deliveries: Mutex<Vec<(String, Vec<Task>)>>,
    fail: AtomicBool,
}

impl FakeTaskCallbackClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Recorded deliveries as (receptor_url, tasks).
    pub fn deliveries(&self) -> Vec<(String, Vec<Task>)> {
        self.deliveries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl TaskCallbackClient for FakeTaskCallbackClient {
    async fn complete_tasks(&self, receptor_url: &str, tasks: Vec<Task>) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("receptor unreachable");
        }
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((receptor_url.to_string(), tasks));
        Ok(())
    }
}
