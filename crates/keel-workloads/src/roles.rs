//! Role-specific views of the store.
//!
//! Every role talks to the same [`Bbs`]; these traits name the subset each
//! one is allowed to reach. The lock-only roles (nsync, route emitter,
//! metrics) have no store surface at all; they only take a well-known
//! lock through `keel-coordination`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use keel_models::ActualLRPGroup;
use keel_models::ActualLRPInstanceKey;
use keel_models::ActualLRPKey;
use keel_models::ActualLRPNetInfo;
use keel_models::CellPresence;
use keel_models::DesiredLRP;
use keel_models::DesiredLRPEvent;
use keel_models::DesiredLRPUpdate;
use keel_models::Task;

use crate::bbs::Bbs;
use crate::error::Result;
use crate::evacuation::ContainerRetainment;
use crate::watch::EventStream;

/// Surface used by the receptor API façade.
#[async_trait]
pub trait ReceptorApi: Send + Sync {
    // tasks
    async fn desire_task(&self, task: &Task) -> Result<()>;
    async fn tasks(&self) -> Result<Vec<Task>>;
    async fn tasks_by_domain(&self, domain: &str) -> Result<Vec<Task>>;
    async fn task_by_guid(&self, task_guid: &str) -> Result<Task>;
    async fn resolving_task(&self, task_guid: &str) -> Result<()>;
    async fn resolve_task(&self, task_guid: &str) -> Result<()>;
    async fn cancel_task(&self, task_guid: &str) -> Result<()>;

    // desired LRPs
    async fn desire_lrp(&self, lrp: &DesiredLRP) -> Result<()>;
    async fn update_desired_lrp(&self, process_guid: &str, update: &DesiredLRPUpdate) -> Result<()>;
    async fn remove_desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<()>;
    async fn desired_lrps(&self) -> Result<Vec<DesiredLRP>>;
    async fn desired_lrps_by_domain(&self, domain: &str) -> Result<Vec<DesiredLRP>>;
    async fn desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<DesiredLRP>;
    async fn watch_for_desired_lrp_changes(&self) -> Result<EventStream<DesiredLRPEvent>>;

    // actual LRPs
    async fn actual_lrp_groups(&self) -> Result<Vec<ActualLRPGroup>>;
    async fn actual_lrp_groups_by_domain(&self, domain: &str) -> Result<Vec<ActualLRPGroup>>;
    async fn actual_lrp_groups_by_process_guid(&self, process_guid: &str) -> Result<BTreeMap<i32, ActualLRPGroup>>;
    async fn actual_lrp_group_by_process_guid_and_index(&self, process_guid: &str, index: i32)
    -> Result<ActualLRPGroup>;
    async fn retire_actual_lrps(&self, keys: &[ActualLRPKey]);

    // cells & domains
    async fn cells(&self) -> Result<Vec<CellPresence>>;
    async fn upsert_domain(&self, domain: &str, ttl_seconds: u64) -> Result<()>;
    async fn domains(&self) -> Result<Vec<String>>;
}

/// Surface used by the per-cell rep.
#[async_trait]
pub trait RepApi: Send + Sync {
    // tasks
    async fn start_task(&self, task_guid: &str, cell_id: &str) -> Result<bool>;
    async fn task_by_guid(&self, task_guid: &str) -> Result<Task>;
    async fn tasks_by_cell_id(&self, cell_id: &str) -> Result<Vec<Task>>;
    async fn fail_task(&self, task_guid: &str, failure_reason: &str) -> Result<()>;
    async fn complete_task(
        &self,
        task_guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<()>;

    // actual LRPs
    async fn actual_lrp_groups_by_cell_id(&self, cell_id: &str) -> Result<Vec<ActualLRPGroup>>;
    async fn claim_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey) -> Result<keel_models::ActualLRP>;
    async fn start_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
    ) -> Result<keel_models::ActualLRP>;
    async fn crash_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey, reason: &str)
    -> Result<()>;
    async fn remove_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey) -> Result<()>;

    // evacuation
    async fn evacuate_claimed_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<ContainerRetainment>;
    async fn evacuate_running_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
        evacuation_ttl_seconds: u64,
    ) -> Result<ContainerRetainment>;
    async fn evacuate_stopped_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<ContainerRetainment>;
    async fn evacuate_crashed_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        reason: &str,
    ) -> Result<ContainerRetainment>;
    async fn remove_evacuating_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey)
    -> Result<()>;
}

/// Surface used by the converger.
#[async_trait]
pub trait ConvergerApi: Send + Sync {
    async fn converge_lrps(&self);
    async fn converge_tasks(
        &self,
        expire_pending_task_duration: Duration,
        convergence_interval: Duration,
        time_to_resolve: Duration,
    );
    async fn cell_events(&self) -> Result<keel_coordination::CellEventStream>;
}

/// Surface used by the auctioneer front-end.
#[async_trait]
pub trait AuctioneerApi: Send + Sync {
    async fn cells(&self) -> Result<Vec<CellPresence>>;
    async fn fail_task(&self, task_guid: &str, failure_reason: &str) -> Result<()>;
    async fn fail_actual_lrp(&self, key: &ActualLRPKey, placement_error: &str) -> Result<()>;
}

#[async_trait]
impl ReceptorApi for Bbs {
    async fn desire_task(&self, task: &Task) -> Result<()> {
        Bbs::desire_task(self, task).await
    }

    async fn tasks(&self) -> Result<Vec<Task>> {
        Bbs::tasks(self).await
    }

    async fn tasks_by_domain(&self, domain: &str) -> Result<Vec<Task>> {
        Bbs::tasks_by_domain(self, domain).await
    }

    async fn task_by_guid(&self, task_guid: &str) -> Result<Task> {
        Bbs::task_by_guid(self, task_guid).await
    }

    async fn resolving_task(&self, task_guid: &str) -> Result<()> {
        Bbs::resolving_task(self, task_guid).await
    }

    async fn resolve_task(&self, task_guid: &str) -> Result<()> {
        Bbs::resolve_task(self, task_guid).await
    }

    async fn cancel_task(&self, task_guid: &str) -> Result<()> {
        Bbs::cancel_task(self, task_guid).await
    }

    async fn desire_lrp(&self, lrp: &DesiredLRP) -> Result<()> {
        Bbs::desire_lrp(self, lrp).await
    }

    async fn update_desired_lrp(&self, process_guid: &str, update: &DesiredLRPUpdate) -> Result<()> {
        Bbs::update_desired_lrp(self, process_guid, update).await
    }

    async fn remove_desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<()> {
        Bbs::remove_desired_lrp_by_process_guid(self, process_guid).await
    }

    async fn desired_lrps(&self) -> Result<Vec<DesiredLRP>> {
        Bbs::desired_lrps(self).await
    }

    async fn desired_lrps_by_domain(&self, domain: &str) -> Result<Vec<DesiredLRP>> {
        Bbs::desired_lrps_by_domain(self, domain).await
    }

    async fn desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<DesiredLRP> {
        Bbs::desired_lrp_by_process_guid(self, process_guid).await
    }

    async fn watch_for_desired_lrp_changes(&self) -> Result<EventStream<DesiredLRPEvent>> {
        Bbs::watch_for_desired_lrp_changes(self).await
    }

    async fn actual_lrp_groups(&self) -> Result<Vec<ActualLRPGroup>> {
        Bbs::actual_lrp_groups(self).await
    }

    async fn actual_lrp_groups_by_domain(&self, domain: &str) -> Result<Vec<ActualLRPGroup>> {
        Bbs::actual_lrp_groups_by_domain(self, domain).await
    }

    async fn actual_lrp_groups_by_process_guid(&self, process_guid: &str) -> Result<BTreeMap<i32, ActualLRPGroup>> {
        Bbs::actual_lrp_groups_by_process_guid(self, process_guid).await
    }

    async fn actual_lrp_group_by_process_guid_and_index(
        &self,
        process_guid: &str,
        index: i32,
    ) -> Result<ActualLRPGroup> {
        Bbs::actual_lrp_group_by_process_guid_and_index(self, process_guid, index).await
    }

    async fn retire_actual_lrps(&self, keys: &[ActualLRPKey]) {
        Bbs::retire_actual_lrps(self, keys).await
    }

    async fn cells(&self) -> Result<Vec<CellPresence>> {
        Ok(self.services().cells().await?)
    }

    async fn upsert_domain(&self, domain: &str, ttl_seconds: u64) -> Result<()> {
        Bbs::upsert_domain(self, domain, ttl_seconds).await
    }

    async fn domains(&self) -> Result<Vec<String>> {
        Bbs::domains(self).await
    }
}

#[async_trait]
impl RepApi for Bbs {
    async fn start_task(&self, task_guid: &str, cell_id: &str) -> Result<bool> {
        Bbs::start_task(self, task_guid, cell_id).await
    }

    async fn task_by_guid(&self, task_guid: &str) -> Result<Task> {
        Bbs::task_by_guid(self, task_guid).await
    }

    async fn tasks_by_cell_id(&self, cell_id: &str) -> Result<Vec<Task>> {
        Bbs::tasks_by_cell_id(self, cell_id).await
    }

    async fn fail_task(&self, task_guid: &str, failure_reason: &str) -> Result<()> {
        Bbs::fail_task(self, task_guid, failure_reason).await
    }

    async fn complete_task(
        &self,
        task_guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<()> {
        Bbs::complete_task(self, task_guid, cell_id, failed, failure_reason, result).await
    }

    async fn actual_lrp_groups_by_cell_id(&self, cell_id: &str) -> Result<Vec<ActualLRPGroup>> {
        Bbs::actual_lrp_groups_by_cell_id(self, cell_id).await
    }

    async fn claim_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<keel_models::ActualLRP> {
        Bbs::claim_actual_lrp(self, key, instance_key).await
    }

    async fn start_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
    ) -> Result<keel_models::ActualLRP> {
        Bbs::start_actual_lrp(self, key, instance_key, net_info).await
    }

    async fn crash_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        reason: &str,
    ) -> Result<()> {
        Bbs::crash_actual_lrp(self, key, instance_key, reason).await
    }

    async fn remove_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey) -> Result<()> {
        Bbs::remove_actual_lrp(self, key, instance_key).await
    }

    async fn evacuate_claimed_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<ContainerRetainment> {
        Bbs::evacuate_claimed_actual_lrp(self, key, instance_key).await
    }

    async fn evacuate_running_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
        evacuation_ttl_seconds: u64,
    ) -> Result<ContainerRetainment> {
        Bbs::evacuate_running_actual_lrp(self, key, instance_key, net_info, evacuation_ttl_seconds).await
    }

    async fn evacuate_stopped_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<ContainerRetainment> {
        Bbs::evacuate_stopped_actual_lrp(self, key, instance_key).await
    }

    async fn evacuate_crashed_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        reason: &str,
    ) -> Result<ContainerRetainment> {
        Bbs::evacuate_crashed_actual_lrp(self, key, instance_key, reason).await
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<()> {
        Bbs::remove_evacuating_actual_lrp(self, key, instance_key).await
    }
}

#[async_trait]
impl ConvergerApi for Bbs {
    async fn converge_lrps(&self) {
        Bbs::converge_lrps(self).await
    }

    async fn converge_tasks(
        &self,
        expire_pending_task_duration: Duration,
        convergence_interval: Duration,
        time_to_resolve: Duration,
    ) {
        Bbs::converge_tasks(self, expire_pending_task_duration, convergence_interval, time_to_resolve).await
    }

    async fn cell_events(&self) -> Result<keel_coordination::CellEventStream> {
        Bbs::cell_events(self).await
    }
}

#[async_trait]
impl AuctioneerApi for Bbs {
    async fn cells(&self) -> Result<Vec<CellPresence>> {
        Ok(self.services().cells().await?)
    }

    async fn fail_task(&self, task_guid: &str, failure_reason: &str) -> Result<()> {
        Bbs::fail_task(self, task_guid, failure_reason).await
    }

    async fn fail_actual_lrp(&self, key: &ActualLRPKey, placement_error: &str) -> Result<()> {
        Bbs::fail_actual_lrp(self, key, placement_error).await
    }
}
