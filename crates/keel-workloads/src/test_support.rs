//! Deterministic harness for workload-store tests.
//!
//! Wires a [`Bbs`] against the in-memory store, an in-memory session
//! registry, a fake clock and recording outbound clients. An auctioneer
//! presence is seeded so auction requests are recorded instead of failing
//! on lookup.

use std::sync::Arc;

use keel_coordination::InMemorySessionRegistry;
use keel_core::Clock;
use keel_core::FakeClock;
use keel_core::InMemoryKeyValueStore;
use keel_core::KeyValueStore;
use keel_core::StoreNode;
use keel_core::schema;
use keel_models::Action;
use keel_models::ActualLRP;
use keel_models::ActualLRPInstanceKey;
use keel_models::ActualLRPKey;
use keel_models::ActualLRPNetInfo;
use keel_models::ActualLRPState;
use keel_models::AuctioneerPresence;
use keel_models::CellCapacity;
use keel_models::CellPresence;
use keel_models::DesiredLRP;
use keel_models::ModificationTag;
use keel_models::ReceptorPresence;

use crate::bbs::Bbs;
use crate::clients::FakeAuctioneerClient;
use crate::clients::FakeCellClient;
use crate::clients::FakeTaskCallbackClient;

/// Epoch-nanosecond instant the fake clock starts at.
pub const TEST_EPOCH_NANOS: i64 = 1_700_000_000_000_000_000;

/// A [`Bbs`] wired entirely against deterministic collaborators.
pub struct TestBbs {
    pub bbs: Bbs,
    pub store: Arc<InMemoryKeyValueStore>,
    pub registry: Arc<InMemorySessionRegistry>,
    pub clock: Arc<FakeClock>,
    pub auctioneer: Arc<FakeAuctioneerClient>,
    pub cells: Arc<FakeCellClient>,
    pub callbacks: Arc<FakeTaskCallbackClient>,
}

impl Default for TestBbs {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBbs {
    pub fn new() -> Self {
        let clock = FakeClock::new(TEST_EPOCH_NANOS);
        let store = InMemoryKeyValueStore::with_clock(clock.clone());
        let registry = InMemorySessionRegistry::new();
        let auctioneer = Arc::new(FakeAuctioneerClient::new());
        let cells = Arc::new(FakeCellClient::new());
        let callbacks = Arc::new(FakeTaskCallbackClient::new());

        let presence = AuctioneerPresence::new("auctioneer-1", "http://auctioneer.example.com");
        registry.seed(
            schema::lock_path(keel_coordination::AUCTIONEER_LOCK_NAME),
            serde_json::to_string(&presence).expect("encode auctioneer presence"),
        );

        let bbs = Bbs::new(
            store.clone(),
            registry.clone(),
            clock.clone(),
            auctioneer.clone(),
            cells.clone(),
            callbacks.clone(),
        );

        Self {
            bbs,
            store,
            registry,
            clock,
            auctioneer,
            cells,
            callbacks,
        }
    }

    /// Seed a live cell presence; rep address is `address-for-<cell_id>`.
    pub async fn seed_cell(&self, cell_id: &str) {
        let presence = CellPresence::new(
            cell_id,
            format!("address-for-{cell_id}"),
            "lucid64",
            "z1",
            CellCapacity {
                memory_mb: 1024,
                disk_mb: 2048,
                containers: 256,
            },
        );
        self.registry.seed(
            schema::cell_path(cell_id),
            serde_json::to_string(&presence).expect("encode cell presence"),
        );
    }

    /// Remove a cell presence.
    pub fn remove_cell(&self, cell_id: &str) {
        self.registry.remove(&schema::cell_path(cell_id));
    }

    /// Seed a live receptor presence.
    pub fn seed_receptor(&self, receptor_url: &str) {
        let presence = ReceptorPresence::new("receptor-1", receptor_url);
        self.registry.seed(
            schema::receptor_path("receptor-1"),
            serde_json::to_string(&presence).expect("encode receptor presence"),
        );
    }

    /// Write an `/instance` record directly.
    pub async fn put_instance_lrp(&self, process_guid: &str, index: i32, state: ActualLRPState, instance_key: ActualLRPInstanceKey) {
        let net_info = if state == ActualLRPState::Running {
            ActualLRPNetInfo::new("1.2.3.4", vec![])
        } else {
            ActualLRPNetInfo::default()
        };
        let lrp = ActualLRP {
            key: ActualLRPKey::new(process_guid, index, "some-domain"),
            instance_key,
            net_info,
            state,
            since: self.clock.now_nanos(),
            modification_tag: ModificationTag::fresh(),
            ..Default::default()
        };
        self.put_raw_instance_lrp(&lrp).await;
    }

    /// Write an arbitrary `/instance` record directly.
    pub async fn put_raw_instance_lrp(&self, lrp: &ActualLRP) {
        let value = serde_json::to_string(lrp).expect("encode actual lrp");
        self.store
            .set(StoreNode::new(schema::actual_lrp_path(&lrp.key.process_guid, lrp.key.index), value))
            .await
            .expect("write instance record");
    }

    /// Write an `/evacuating` record directly, Running with net info.
    pub async fn put_evacuating_lrp(&self, process_guid: &str, index: i32, instance_key: ActualLRPInstanceKey, ttl_seconds: u64) {
        let lrp = ActualLRP {
            key: ActualLRPKey::new(process_guid, index, "some-domain"),
            instance_key,
            net_info: ActualLRPNetInfo::new("1.2.3.4", vec![keel_models::PortMapping {
                container_port: 8080,
                host_port: 6000,
            }]),
            state: ActualLRPState::Running,
            since: self.clock.now_nanos(),
            modification_tag: ModificationTag::fresh(),
            ..Default::default()
        };
        let value = serde_json::to_string(&lrp).expect("encode actual lrp");
        self.store
            .set(StoreNode::with_ttl(schema::evacuating_actual_lrp_path(process_guid, index), value, ttl_seconds))
            .await
            .expect("write evacuating record");
    }

    /// Overwrite the crash count of an existing `/instance` record.
    pub async fn set_instance_crash_count(&self, process_guid: &str, index: i32, crash_count: i32) {
        let mut lrp = self.instance_lrp(process_guid, index).await;
        lrp.crash_count = crash_count;
        self.put_raw_instance_lrp(&lrp).await;
    }

    /// Read and decode the `/instance` record; panics if absent.
    pub async fn instance_lrp(&self, process_guid: &str, index: i32) -> ActualLRP {
        self.try_instance_lrp(process_guid, index).await.expect("instance record should exist")
    }

    /// Read and decode the `/instance` record if present.
    pub async fn try_instance_lrp(&self, process_guid: &str, index: i32) -> Option<ActualLRP> {
        let node = self.store.get(&schema::actual_lrp_path(process_guid, index)).await.ok()?;
        Some(ActualLRP::from_json(&node.value).expect("decode instance record"))
    }

    /// Read and decode the `/evacuating` record; panics if absent.
    pub async fn evacuating_lrp(&self, process_guid: &str, index: i32) -> ActualLRP {
        self.try_evacuating_lrp(process_guid, index).await.expect("evacuating record should exist")
    }

    /// Read and decode the `/evacuating` record if present.
    pub async fn try_evacuating_lrp(&self, process_guid: &str, index: i32) -> Option<ActualLRP> {
        let node = self.store.get(&schema::evacuating_actual_lrp_path(process_guid, index)).await.ok()?;
        Some(ActualLRP::from_json(&node.value).expect("decode evacuating record"))
    }

    /// TTL carried by the `/evacuating` record.
    pub async fn evacuating_ttl(&self, process_guid: &str, index: i32) -> u64 {
        self.store
            .get(&schema::evacuating_actual_lrp_path(process_guid, index))
            .await
            .expect("evacuating record should exist")
            .ttl_seconds
    }
}

/// A valid desired LRP with the given guid and instance count.
pub fn desired_lrp_with_instances(process_guid: &str, instances: i32) -> DesiredLRP {
    DesiredLRP {
        process_guid: process_guid.to_string(),
        domain: "some-domain".to_string(),
        root_fs: "docker:///cloudfoundry/rootfs".to_string(),
        stack: "lucid64".to_string(),
        instances,
        memory_mb: 256,
        disk_mb: 1024,
        cpu_weight: 20,
        setup: None,
        action: Action::Run {
            path: "/bin/server".to_string(),
            args: vec![],
            env: vec![],
            resource_limits: None,
        },
        monitor: None,
        ports: vec![8080],
        routes: vec![],
        log_guid: "log-guid".to_string(),
        log_source: "APP".to_string(),
        annotation: String::new(),
        environment_variables: vec![],
        modification_tag: ModificationTag::default(),
    }
}

/// A valid task with the given guid.
pub fn task_with_guid(task_guid: &str) -> keel_models::Task {
    keel_models::Task {
        task_guid: task_guid.to_string(),
        domain: "some-domain".to_string(),
        root_fs: "docker:///cloudfoundry/rootfs".to_string(),
        stack: "lucid64".to_string(),
        memory_mb: 128,
        disk_mb: 256,
        cpu_weight: 10,
        action: Some(Action::Run {
            path: "/bin/stage".to_string(),
            args: vec![],
            env: vec![],
            resource_limits: None,
        }),
        result_file: "/tmp/result".to_string(),
        ..Default::default()
    }
}
