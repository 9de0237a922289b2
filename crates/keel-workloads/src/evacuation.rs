//! Evacuation protocol: graceful drain of a cell.
//!
//! While a cell drains, a transient `/evacuating` record coexists with the
//! authoritative `/instance` record for each index it hosts, so the old
//! container keeps serving while a replacement is auctioned. Every
//! operation returns a [`ContainerRetainment`] telling the cell whether the
//! container must be kept alive. `/evacuating` records always carry a
//! finite TTL so an interrupted drain cannot leak them.

use keel_core::StoreError;
use keel_core::StoreNode;
use keel_core::schema;
use keel_models::ActualLRP;
use keel_models::ActualLRPInstanceKey;
use keel_models::ActualLRPKey;
use keel_models::ActualLRPNetInfo;
use keel_models::ActualLRPState;
use keel_models::ModelError;
use keel_models::ModificationTag;
use tracing::debug;
use tracing::info;

use crate::bbs::Bbs;
use crate::error::BbsError;
use crate::error::Result;

/// Whether the evacuating cell must keep the container alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRetainment {
    /// Keep serving; the drain is still in progress for this instance.
    KeepContainer,
    /// The instance is accounted for elsewhere; tear the container down.
    DeleteContainer,
}

impl Bbs {
    /// Evacuate an instance the cell has claimed but not started.
    ///
    /// The slot goes back to Unclaimed for re-auction; the container is
    /// never worth keeping.
    pub async fn evacuate_claimed_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<ContainerRetainment> {
        let _ = self.remove_evacuating_actual_lrp(key, instance_key).await;

        match self.unclaim_held_actual_lrp(key, instance_key).await {
            Ok(true) => {
                self.request_lrp_auction_for_key(key).await;
            }
            Ok(false) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        Ok(ContainerRetainment::DeleteContainer)
    }

    /// Evacuate an instance that has already stopped on the cell.
    pub async fn evacuate_stopped_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<ContainerRetainment> {
        let _ = self.remove_evacuating_actual_lrp(key, instance_key).await;

        match self.remove_actual_lrp(key, instance_key).await {
            Ok(()) => Ok(ContainerRetainment::DeleteContainer),
            Err(err) if err.is_not_found() => Ok(ContainerRetainment::DeleteContainer),
            Err(err) if err.is_comparison_failed() => Err(ModelError::ActualLrpCannotBeRemoved.into()),
            Err(err) => Err(err),
        }
    }

    /// Evacuate an instance that crashed on the draining cell.
    pub async fn evacuate_crashed_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        reason: &str,
    ) -> Result<ContainerRetainment> {
        let _ = self.remove_evacuating_actual_lrp(key, instance_key).await;

        match self.crash_actual_lrp(key, instance_key, reason).await {
            Ok(()) => Ok(ContainerRetainment::DeleteContainer),
            Err(err) if err.is_not_found() => Ok(ContainerRetainment::DeleteContainer),
            Err(err) => Err(err),
        }
    }

    /// Evacuate a running instance.
    ///
    /// The interesting case: while the replacement is not yet running
    /// elsewhere, the drain parks the instance in `/evacuating` and keeps
    /// the container alive. Once another placement owns the slot, the
    /// evacuating record is dropped and the container deleted.
    pub async fn evacuate_running_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
        evacuation_ttl_seconds: u64,
    ) -> Result<ContainerRetainment> {
        let (instance, store_index) = match self.fetch_instance_lrp(key).await {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                return match self.remove_evacuating_actual_lrp(key, instance_key).await {
                    Ok(()) => Ok(ContainerRetainment::DeleteContainer),
                    Err(err) if is_cannot_be_removed(&err) => Ok(ContainerRetainment::DeleteContainer),
                    Err(err) => Err(err),
                };
            }
            Err(err) => return Err(err),
        };

        let held_by_caller = instance.instance_key == *instance_key;

        // Replacement not placed yet: park in /evacuating, keep serving.
        if (instance.state == ActualLRPState::Unclaimed && instance.placement_error.is_empty())
            || (instance.state == ActualLRPState::Claimed && !held_by_caller)
        {
            return match self
                .conditionally_evacuate_actual_lrp(key, instance_key, net_info, evacuation_ttl_seconds)
                .await
            {
                Ok(()) => Ok(ContainerRetainment::KeepContainer),
                Err(err)
                    if matches!(err.as_store(), Some(StoreError::ResourceExists { .. }))
                        || is_cannot_be_evacuated(&err) =>
                {
                    Ok(ContainerRetainment::DeleteContainer)
                }
                Err(err) => Err(err),
            };
        }

        // The caller still owns the slot: record the drain, release the
        // slot for re-auction, keep the container until the replacement is
        // up.
        if matches!(instance.state, ActualLRPState::Claimed | ActualLRPState::Running) && held_by_caller {
            self.unconditionally_evacuate_actual_lrp(key, instance_key, net_info, evacuation_ttl_seconds).await?;

            let changed = self.unclaim_fetched_actual_lrp(instance, store_index).await?;
            if changed {
                self.request_lrp_auction_for_key(key).await;
            }
            return Ok(ContainerRetainment::KeepContainer);
        }

        // The slot is accounted for elsewhere (placed on another cell,
        // unplaceable, or parked in Crashed): finish the drain.
        if (instance.state == ActualLRPState::Unclaimed && !instance.placement_error.is_empty())
            || (instance.state == ActualLRPState::Running && !held_by_caller)
            || instance.state == ActualLRPState::Crashed
        {
            return match self.remove_evacuating_actual_lrp(key, instance_key).await {
                Ok(()) => Ok(ContainerRetainment::DeleteContainer),
                Err(err) if is_cannot_be_removed(&err) => Ok(ContainerRetainment::DeleteContainer),
                Err(err) => Err(err),
            };
        }

        Ok(ContainerRetainment::KeepContainer)
    }

    /// CAS-delete the `/evacuating` record; requires matching keys.
    ///
    /// Idempotent: an already-absent record is success.
    pub async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
    ) -> Result<()> {
        let (evacuating, store_index) = match self.fetch_evacuating_lrp(key).await {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                debug!(
                    process_guid = %key.process_guid,
                    index = key.index,
                    "evacuating-actual-lrp-already-removed",
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if evacuating.key != *key || evacuating.instance_key != *instance_key {
            return Err(ModelError::ActualLrpCannotBeRemoved.into());
        }

        self.store
            .compare_and_delete_by_index(store_index, &schema::evacuating_actual_lrp_path(&key.process_guid, key.index))
            .await?;
        info!(process_guid = %key.process_guid, index = key.index, "removed-evacuating-actual-lrp");
        Ok(())
    }

    /// Unclaim the `/instance` record if it is held by `instance_key`.
    async fn unclaim_held_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey) -> Result<bool> {
        let (instance, store_index) = self.fetch_instance_lrp(key).await?;
        if instance.state == ActualLRPState::Unclaimed {
            return Ok(false);
        }
        if instance.instance_key != *instance_key {
            return Err(ModelError::ActualLrpCannotBeUnclaimed.into());
        }
        self.unclaim_fetched_actual_lrp(instance, store_index).await
    }

    /// Write `/evacuating` only if absent or already owned by the caller.
    async fn conditionally_evacuate_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
        evacuation_ttl_seconds: u64,
    ) -> Result<()> {
        let (existing, store_index) = match self.fetch_evacuating_lrp(key).await {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                return self.create_evacuating_actual_lrp(key, instance_key, net_info, evacuation_ttl_seconds).await;
            }
            Err(err) => return Err(err),
        };

        if existing.key == *key && existing.instance_key == *instance_key && existing.net_info == *net_info {
            return Ok(());
        }
        if existing.key != *key || existing.instance_key != *instance_key {
            return Err(ModelError::ActualLrpCannotBeEvacuated.into());
        }

        self.swap_evacuating_actual_lrp(existing, instance_key, net_info, store_index, evacuation_ttl_seconds).await
    }

    /// Write `/evacuating` regardless of any other caller's record.
    async fn unconditionally_evacuate_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
        evacuation_ttl_seconds: u64,
    ) -> Result<()> {
        let (existing, store_index) = match self.fetch_evacuating_lrp(key).await {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                return self.create_evacuating_actual_lrp(key, instance_key, net_info, evacuation_ttl_seconds).await;
            }
            Err(err) => return Err(err),
        };

        if existing.key == *key && existing.instance_key == *instance_key && existing.net_info == *net_info {
            return Ok(());
        }

        self.swap_evacuating_actual_lrp(existing, instance_key, net_info, store_index, evacuation_ttl_seconds).await
    }

    async fn create_evacuating_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
        evacuation_ttl_seconds: u64,
    ) -> Result<()> {
        let lrp = ActualLRP {
            key: key.clone(),
            instance_key: instance_key.clone(),
            net_info: net_info.clone(),
            state: ActualLRPState::Running,
            since: self.now(),
            modification_tag: ModificationTag::fresh(),
            ..Default::default()
        };
        let value = serde_json::to_string(&lrp).map_err(ModelError::from)?;
        self.store
            .create(StoreNode::with_ttl(
                schema::evacuating_actual_lrp_path(&key.process_guid, key.index),
                value,
                evacuation_ttl_seconds,
            ))
            .await?;
        info!(process_guid = %key.process_guid, index = key.index, "created-evacuating-actual-lrp");
        Ok(())
    }

    async fn swap_evacuating_actual_lrp(
        &self,
        existing: ActualLRP,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
        store_index: u64,
        evacuation_ttl_seconds: u64,
    ) -> Result<()> {
        let key = existing.key.clone();
        let mut updated = existing;
        updated.instance_key = instance_key.clone();
        updated.net_info = net_info.clone();
        updated.placement_error = String::new();
        updated.since = self.now();
        updated.modification_tag.increment();

        let value = serde_json::to_string(&updated).map_err(ModelError::from)?;
        self.store
            .compare_and_swap_by_index(
                store_index,
                StoreNode::with_ttl(
                    schema::evacuating_actual_lrp_path(&key.process_guid, key.index),
                    value,
                    evacuation_ttl_seconds,
                ),
            )
            .await?;
        Ok(())
    }
}

fn is_cannot_be_removed(err: &BbsError) -> bool {
    matches!(err.as_model(), Some(ModelError::ActualLrpCannotBeRemoved))
}

fn is_cannot_be_evacuated(err: &BbsError) -> bool {
    matches!(err.as_model(), Some(ModelError::ActualLrpCannotBeEvacuated))
}
