//! Actual-LRP store and lifecycle.
//!
//! All transitions go through CAS-by-index on the `/instance` record: a
//! failed comparison is surfaced to the caller, which retries idempotently.
//! The `/evacuating` sibling record is managed in [`crate::evacuation`].

use std::collections::BTreeMap;

use keel_core::StoreError;
use keel_core::StoreNode;
use keel_core::WorkPool;
use keel_core::schema;
use keel_models::ActualLRP;
use keel_models::ActualLRPGroup;
use keel_models::ActualLRPInstanceKey;
use keel_models::ActualLRPKey;
use keel_models::ActualLRPNetInfo;
use keel_models::ActualLRPState;
use keel_models::ModelError;
use keel_models::ModificationTag;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::bbs::Bbs;
use crate::error::BbsError;
use crate::error::Result;

/// `(process_guid, index, evacuating)` parsed from an actual-LRP store key.
pub(crate) fn parse_actual_lrp_key(key: &str) -> Option<(String, i32, bool)> {
    let rest = key.strip_prefix(schema::ACTUAL_LRP_ROOT)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let process_guid = parts.next()?;
    let index: i32 = parts.next()?.parse().ok()?;
    let leaf = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    match leaf {
        schema::ACTUAL_LRP_INSTANCE_LEAF => Some((process_guid.to_string(), index, false)),
        schema::ACTUAL_LRP_EVACUATING_LEAF => Some((process_guid.to_string(), index, true)),
        _ => None,
    }
}

/// Unclaim an `/instance` record through CAS, clearing its placement.
///
/// Free-standing so convergence can fan it out through a [`WorkPool`] with
/// cloned collaborators. Returns false when the record was already
/// Unclaimed.
pub(crate) async fn unclaim_instance_record(
    store: std::sync::Arc<dyn keel_core::KeyValueStore>,
    clock: std::sync::Arc<dyn keel_core::Clock>,
    key: ActualLRPKey,
) -> Result<bool> {
    let path = schema::actual_lrp_path(&key.process_guid, key.index);
    let node = store.get(&path).await?;
    let lrp = ActualLRP::from_json(&node.value)?;
    if lrp.state == ActualLRPState::Unclaimed {
        return Ok(false);
    }

    let mut unclaimed = lrp;
    unclaimed.state = ActualLRPState::Unclaimed;
    unclaimed.instance_key = ActualLRPInstanceKey::default();
    unclaimed.net_info = ActualLRPNetInfo::default();
    unclaimed.placement_error = String::new();
    unclaimed.since = clock.now_nanos();
    unclaimed.modification_tag.increment();

    let value = serde_json::to_string(&unclaimed).map_err(ModelError::from)?;
    store.compare_and_swap_by_index(node.index, StoreNode::new(path, value)).await?;
    info!(process_guid = %key.process_guid, index = key.index, "unclaimed-actual-lrp");
    Ok(true)
}

impl Bbs {
    /// Create the Unclaimed `/instance` record for an instance slot.
    pub async fn create_unclaimed_actual_lrp(&self, key: &ActualLRPKey) -> Result<()> {
        key.validate()?;

        let lrp = ActualLRP::new_unclaimed(key.clone(), self.now());
        let value = serde_json::to_string(&lrp).map_err(ModelError::from)?;
        self.store
            .create(StoreNode::new(schema::actual_lrp_path(&key.process_guid, key.index), value))
            .await?;
        Ok(())
    }

    /// A cell claims an instance slot before starting its container.
    ///
    /// Re-claiming with identical keys is a no-op, making retries safe.
    pub async fn claim_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey) -> Result<ActualLRP> {
        key.validate()?;
        instance_key.validate()?;
        if instance_key.is_empty() {
            return Err(ModelError::invalid_field("instance_guid").into());
        }

        let (lrp, store_index) = self.fetch_instance_lrp(key).await?;

        if lrp.state == ActualLRPState::Claimed && lrp.instance_key == *instance_key {
            return Ok(lrp);
        }
        if !lrp.allows_transition_to(key, instance_key, ActualLRPState::Claimed) {
            return Err(ModelError::ActualLrpCannotBeClaimed.into());
        }

        let mut claimed = lrp;
        claimed.state = ActualLRPState::Claimed;
        claimed.instance_key = instance_key.clone();
        claimed.net_info = ActualLRPNetInfo::default();
        claimed.placement_error = String::new();
        claimed.since = self.now();
        claimed.modification_tag.increment();

        self.swap_instance_lrp(&claimed, store_index).await?;
        info!(process_guid = %key.process_guid, index = key.index, cell_id = %instance_key.cell_id, "claimed-actual-lrp");
        Ok(claimed)
    }

    /// A cell reports an instance running, with its network info.
    ///
    /// Creates the record when the converger has not yet seeded it.
    /// Re-starting with identical keys and net info is a no-op.
    pub async fn start_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
    ) -> Result<ActualLRP> {
        key.validate()?;
        instance_key.validate()?;
        if instance_key.is_empty() {
            return Err(ModelError::invalid_field("instance_guid").into());
        }

        let (lrp, store_index) = match self.fetch_instance_lrp(key).await {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                let running = self.new_running_lrp(key, instance_key, net_info);
                let value = serde_json::to_string(&running).map_err(ModelError::from)?;
                self.store
                    .create(StoreNode::new(schema::actual_lrp_path(&key.process_guid, key.index), value))
                    .await?;
                return Ok(running);
            }
            Err(err) => return Err(err),
        };

        if lrp.state == ActualLRPState::Running && lrp.instance_key == *instance_key && lrp.net_info == *net_info {
            return Ok(lrp);
        }
        if !lrp.allows_transition_to(key, instance_key, ActualLRPState::Running) {
            return Err(ModelError::ActualLrpCannotBeStarted.into());
        }

        let mut running = lrp;
        running.state = ActualLRPState::Running;
        running.instance_key = instance_key.clone();
        running.net_info = net_info.clone();
        running.placement_error = String::new();
        running.since = self.now();
        running.modification_tag.increment();

        self.swap_instance_lrp(&running, store_index).await?;
        info!(process_guid = %key.process_guid, index = key.index, cell_id = %instance_key.cell_id, "started-actual-lrp");
        Ok(running)
    }

    /// A cell reports an instance crashed.
    ///
    /// A Running record stable for longer than the crash-reset timeout has
    /// its count forgiven first. Below the crash threshold the record goes
    /// back to Unclaimed and a replacement auction is requested; above it
    /// the record parks in Crashed for convergence's restart back-off.
    pub async fn crash_actual_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        reason: &str,
    ) -> Result<()> {
        key.validate()?;

        let (lrp, store_index) = self.fetch_instance_lrp(key).await?;

        let crashable = matches!(lrp.state, ActualLRPState::Claimed | ActualLRPState::Running);
        if !crashable || lrp.instance_key != *instance_key {
            return Err(ModelError::ActualLrpCannotBeCrashed.into());
        }

        let mut crash_count = lrp.crash_count;
        if lrp.state == ActualLRPState::Running {
            let stable_for = keel_core::nanos_since(self.now(), lrp.since);
            if stable_for >= self.crash_policy.reset_timeout.as_nanos() as i64 {
                crash_count = 0;
            }
        }
        crash_count += 1;

        let mut crashed = lrp;
        crashed.instance_key = ActualLRPInstanceKey::default();
        crashed.net_info = ActualLRPNetInfo::default();
        crashed.crash_count = crash_count;
        crashed.crash_reason = reason.to_string();
        crashed.since = self.now();
        crashed.modification_tag.increment();

        if crash_count > self.crash_policy.max_crash_count {
            crashed.state = ActualLRPState::Crashed;
            self.swap_instance_lrp(&crashed, store_index).await?;
            warn!(
                process_guid = %key.process_guid,
                index = key.index,
                crash_count,
                reason = %reason,
                "actual-lrp-crashed-beyond-threshold",
            );
            return Ok(());
        }

        crashed.state = ActualLRPState::Unclaimed;
        self.swap_instance_lrp(&crashed, store_index).await?;
        info!(
            process_guid = %key.process_guid,
            index = key.index,
            crash_count,
            reason = %reason,
            "unclaimed-crashed-actual-lrp",
        );

        self.request_lrp_auction_for_key(key).await;
        Ok(())
    }

    /// The auctioneer reports that an Unclaimed instance cannot be placed.
    pub async fn fail_actual_lrp(&self, key: &ActualLRPKey, placement_error: &str) -> Result<()> {
        key.validate()?;
        if placement_error.is_empty() {
            return Err(ModelError::invalid_field("placement_error").into());
        }

        let (lrp, store_index) = self.fetch_instance_lrp(key).await?;
        if lrp.state != ActualLRPState::Unclaimed {
            return Err(ModelError::ActualLrpCannotBeFailed.into());
        }

        let mut failed = lrp;
        failed.placement_error = placement_error.to_string();
        failed.since = self.now();
        failed.modification_tag.increment();
        self.swap_instance_lrp(&failed, store_index).await?;
        Ok(())
    }

    /// CAS-delete the `/instance` record, requiring matching keys.
    pub async fn remove_actual_lrp(&self, key: &ActualLRPKey, instance_key: &ActualLRPInstanceKey) -> Result<()> {
        let (lrp, store_index) = self.fetch_instance_lrp(key).await?;

        if lrp.key != *key || lrp.instance_key != *instance_key {
            return Err(StoreError::comparison_failed(schema::actual_lrp_path(&key.process_guid, key.index)).into());
        }

        self.store
            .compare_and_delete_by_index(store_index, &schema::actual_lrp_path(&key.process_guid, key.index))
            .await?;
        Ok(())
    }

    /// Retire a batch of actuals in parallel.
    ///
    /// Unclaimed records are deleted outright. Claimed/Running records are
    /// stopped through their cell's rep; the record itself is removed when
    /// the cell confirms with a later `remove_actual_lrp`. Failures are
    /// logged; convergence re-derives unfinished retirements.
    pub async fn retire_actual_lrps(&self, keys: &[ActualLRPKey]) {
        let mut pool: WorkPool<()> = WorkPool::new(self.convergence.lrp_pool_size);
        for key in keys {
            let key = key.clone();
            let store = self.store.clone();
            let services = self.services.clone();
            let cell_client = self.cell_client.clone();
            pool.submit(async move {
                let path = schema::actual_lrp_path(&key.process_guid, key.index);
                let node = match store.get(&path).await {
                    Ok(node) => node,
                    Err(StoreError::ResourceNotFound { .. }) => return,
                    Err(err) => {
                        error!(key = %path, error = %err, "failed-fetching-actual-lrp-for-retirement");
                        return;
                    }
                };
                let lrp = match ActualLRP::from_json(&node.value) {
                    Ok(lrp) => lrp,
                    Err(err) => {
                        warn!(key = %path, error = %err, "skipping-retirement-of-invalid-actual-lrp");
                        return;
                    }
                };

                match lrp.state {
                    ActualLRPState::Unclaimed | ActualLRPState::Crashed => {
                        if let Err(err) = store.compare_and_delete_by_index(node.index, &path).await {
                            error!(key = %path, error = %err, "failed-deleting-unclaimed-actual-lrp");
                        }
                    }
                    ActualLRPState::Claimed | ActualLRPState::Running => {
                        let cell = match services.cell_by_id(&lrp.instance_key.cell_id).await {
                            Ok(cell) => cell,
                            Err(err) => {
                                error!(
                                    cell_id = %lrp.instance_key.cell_id,
                                    error = %err,
                                    "failed-finding-cell-for-retirement",
                                );
                                return;
                            }
                        };
                        if let Err(err) =
                            cell_client.stop_lrp_instance(&cell.rep_address, &lrp.key, &lrp.instance_key).await
                        {
                            error!(
                                cell_id = %lrp.instance_key.cell_id,
                                error = %err,
                                "failed-stopping-lrp-instance",
                            );
                        }
                    }
                }
            });
        }
        pool.join_all().await;
    }

    /// Unclaim a record already fetched (and its CAS pre-image).
    /// Returns false when the record was already Unclaimed.
    pub(crate) async fn unclaim_fetched_actual_lrp(&self, lrp: ActualLRP, store_index: u64) -> Result<bool> {
        if lrp.state == ActualLRPState::Unclaimed {
            return Ok(false);
        }

        let key = lrp.key.clone();
        let mut unclaimed = lrp;
        unclaimed.state = ActualLRPState::Unclaimed;
        unclaimed.instance_key = ActualLRPInstanceKey::default();
        unclaimed.net_info = ActualLRPNetInfo::default();
        unclaimed.placement_error = String::new();
        unclaimed.since = self.now();
        unclaimed.modification_tag.increment();

        self.swap_instance_lrp(&unclaimed, store_index).await?;
        info!(process_guid = %key.process_guid, index = key.index, "unclaimed-actual-lrp");
        Ok(true)
    }

    /// All actual-LRP groups.
    pub async fn actual_lrp_groups(&self) -> Result<Vec<ActualLRPGroup>> {
        let by_guid = self.all_groups_by_process_guid().await?;
        Ok(by_guid.into_values().flat_map(|groups| groups.into_values()).collect())
    }

    /// Groups whose key domain matches.
    pub async fn actual_lrp_groups_by_domain(&self, domain: &str) -> Result<Vec<ActualLRPGroup>> {
        if domain.is_empty() {
            return Err(ModelError::invalid_field("domain").into());
        }
        Ok(self
            .actual_lrp_groups()
            .await?
            .into_iter()
            .filter(|group| group.resolve().is_some_and(|lrp| lrp.key.domain == domain))
            .collect())
    }

    /// Groups of one process guid, keyed by index.
    pub async fn actual_lrp_groups_by_process_guid(&self, process_guid: &str) -> Result<BTreeMap<i32, ActualLRPGroup>> {
        if process_guid.is_empty() {
            return Err(ModelError::invalid_field("process_guid").into());
        }

        let nodes = self.store.list_recursively(&schema::actual_lrp_process_dir(process_guid)).await?;
        let mut groups: BTreeMap<i32, ActualLRPGroup> = BTreeMap::new();
        for node in nodes {
            let Some((_, index, evacuating)) = parse_actual_lrp_key(&node.key) else {
                warn!(key = %node.key, "skipping-unparseable-actual-lrp-key");
                continue;
            };
            let lrp = match ActualLRP::from_json(&node.value) {
                Ok(lrp) => lrp,
                Err(err) => {
                    warn!(key = %node.key, error = %err, "skipping-invalid-actual-lrp");
                    continue;
                }
            };
            let group = groups.entry(index).or_default();
            if evacuating {
                group.evacuating = Some(lrp);
            } else {
                group.instance = Some(lrp);
            }
        }
        Ok(groups)
    }

    /// The group for one instance slot.
    pub async fn actual_lrp_group_by_process_guid_and_index(
        &self,
        process_guid: &str,
        index: i32,
    ) -> Result<ActualLRPGroup> {
        let groups = self.actual_lrp_groups_by_process_guid(process_guid).await?;
        groups
            .get(&index)
            .cloned()
            .ok_or_else(|| BbsError::from(StoreError::not_found(schema::actual_lrp_index_dir(process_guid, index))))
    }

    /// Groups with any record placed on the given cell.
    pub async fn actual_lrp_groups_by_cell_id(&self, cell_id: &str) -> Result<Vec<ActualLRPGroup>> {
        if cell_id.is_empty() {
            return Err(ModelError::invalid_field("cell_id").into());
        }
        Ok(self
            .actual_lrp_groups()
            .await?
            .into_iter()
            .filter(|group| {
                let on_cell = |lrp: &ActualLRP| lrp.instance_key.cell_id == cell_id;
                group.instance.as_ref().is_some_and(on_cell) || group.evacuating.as_ref().is_some_and(on_cell)
            })
            .collect())
    }

    /// Every group in the store, keyed by guid then index. Undecodable
    /// payloads are skipped; pruning them is convergence's job.
    pub(crate) async fn all_groups_by_process_guid(&self) -> Result<BTreeMap<String, BTreeMap<i32, ActualLRPGroup>>> {
        let nodes = self.store.list_recursively(schema::ACTUAL_LRP_ROOT).await?;
        let mut by_guid: BTreeMap<String, BTreeMap<i32, ActualLRPGroup>> = BTreeMap::new();
        for node in nodes {
            let Some((process_guid, index, evacuating)) = parse_actual_lrp_key(&node.key) else {
                warn!(key = %node.key, "skipping-unparseable-actual-lrp-key");
                continue;
            };
            let lrp = match ActualLRP::from_json(&node.value) {
                Ok(lrp) => lrp,
                Err(err) => {
                    warn!(key = %node.key, error = %err, "skipping-invalid-actual-lrp");
                    continue;
                }
            };
            let group = by_guid.entry(process_guid).or_default().entry(index).or_default();
            if evacuating {
                group.evacuating = Some(lrp);
            } else {
                group.instance = Some(lrp);
            }
        }
        Ok(by_guid)
    }

    fn new_running_lrp(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        net_info: &ActualLRPNetInfo,
    ) -> ActualLRP {
        ActualLRP {
            key: key.clone(),
            instance_key: instance_key.clone(),
            net_info: net_info.clone(),
            state: ActualLRPState::Running,
            since: self.now(),
            modification_tag: ModificationTag::fresh(),
            ..Default::default()
        }
    }

    async fn swap_instance_lrp(&self, lrp: &ActualLRP, store_index: u64) -> Result<()> {
        let value = serde_json::to_string(lrp).map_err(ModelError::from)?;
        let node = StoreNode::new(schema::actual_lrp_path(&lrp.key.process_guid, lrp.key.index), value);
        self.store.compare_and_swap_by_index(store_index, node).await?;
        Ok(())
    }
}
