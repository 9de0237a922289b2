//! LRP convergence: the periodic reconciliation pass.
//!
//! Run by whichever node holds the converge lock. A pass reads one snapshot
//! of the world (actuals, desireds, cells, fresh domains), computes a
//! [`ConvergenceChanges`] plan of five disjoint lists, and applies it with
//! bounded fan-out. Every step is idempotent and re-derivable: a lost pass
//! is simply re-done by the next one.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use keel_coordination::CellsSnapshot;
use keel_core::Clock;
use keel_core::KeyValueStore;
use keel_core::WorkPool;
use keel_core::nanos_since;
use keel_core::schema;
use keel_models::ActualLRP;
use keel_models::ActualLRPKey;
use keel_models::ActualLRPState;
use keel_models::DesiredLRP;
use keel_models::LRPStartRequest;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::actual_lrp::parse_actual_lrp_key;
use crate::actual_lrp::unclaim_instance_record;
use crate::bbs::Bbs;
use crate::error::Result;
use crate::metrics::record_lrp_convergence;
use crate::metrics::record_lrp_convergence_started;

/// One snapshot of the world, input to plan computation.
pub struct ConvergenceInput {
    /// Decodable desired LRPs by process guid.
    pub desired: BTreeMap<String, DesiredLRP>,
    /// Decodable `/instance` records by process guid and index.
    pub actuals: BTreeMap<String, BTreeMap<i32, ActualLRP>>,
    /// The live cell set.
    pub cells: CellsSnapshot,
    /// Domains whose freshness token is present.
    pub fresh_domains: HashSet<String>,
}

impl ConvergenceInput {
    fn is_fresh(&self, domain: &str) -> bool {
        self.fresh_domains.contains(domain)
    }

    fn desired_instances(&self, process_guid: &str) -> i32 {
        self.desired.get(process_guid).map(|lrp| lrp.instances).unwrap_or(0)
    }
}

/// The reconciliation plan: five disjoint lists.
#[derive(Debug, Default, Clone)]
pub struct ConvergenceChanges {
    /// Claimed/Running records whose cell is gone. Unclaimed and
    /// re-auctioned regardless of freshness: the cell is verifiably dead.
    pub actual_lrps_with_missing_cells: Vec<ActualLRP>,
    /// Indices a fresh desired LRP wants but the store lacks.
    pub actual_lrp_keys_for_missing_indices: Vec<ActualLRPKey>,
    /// Records beyond a fresh desired LRP's instance count; retired.
    pub actual_lrps_for_extra_indices: Vec<ActualLRP>,
    /// Crashed records whose restart back-off has elapsed.
    pub restartable_crashed_actual_lrps: Vec<ActualLRP>,
    /// Unclaimed records old enough that their auction is re-requested.
    pub stale_unclaimed_actual_lrps: Vec<ActualLRP>,
}

impl ConvergenceChanges {
    /// True when a pass would mutate nothing and request nothing.
    pub fn is_empty(&self) -> bool {
        self.actual_lrps_with_missing_cells.is_empty()
            && self.actual_lrp_keys_for_missing_indices.is_empty()
            && self.actual_lrps_for_extra_indices.is_empty()
            && self.restartable_crashed_actual_lrps.is_empty()
            && self.stale_unclaimed_actual_lrps.is_empty()
    }
}

impl Bbs {
    /// Read the snapshot a pass runs against.
    ///
    /// Returns the decodable world plus the keys of undecodable records;
    /// convergence is the only authority that deletes on parse failure.
    pub async fn gather_lrp_convergence_input(&self) -> Result<(ConvergenceInput, Vec<String>)> {
        let mut invalid_keys = Vec::new();

        let mut desired = BTreeMap::new();
        for node in self.store.list_recursively(schema::DESIRED_LRP_ROOT).await? {
            match DesiredLRP::from_json(&node.value) {
                Ok(lrp) => {
                    desired.insert(lrp.process_guid.clone(), lrp);
                }
                Err(err) => {
                    info!(key = %node.key, error = %err, "pruning-invalid-desired-lrp");
                    invalid_keys.push(node.key);
                }
            }
        }

        let mut actuals: BTreeMap<String, BTreeMap<i32, ActualLRP>> = BTreeMap::new();
        for node in self.store.list_recursively(schema::ACTUAL_LRP_ROOT).await? {
            let Some((process_guid, index, evacuating)) = parse_actual_lrp_key(&node.key) else {
                info!(key = %node.key, "pruning-unparseable-actual-lrp-key");
                invalid_keys.push(node.key);
                continue;
            };
            match ActualLRP::from_json(&node.value) {
                Ok(lrp) if !evacuating => {
                    actuals.entry(process_guid).or_default().insert(index, lrp);
                }
                Ok(_) => {
                    // Evacuating records are TTL-managed; convergence only
                    // prunes them when undecodable.
                }
                Err(err) => {
                    info!(key = %node.key, error = %err, "pruning-invalid-actual-lrp");
                    invalid_keys.push(node.key);
                }
            }
        }

        let cells = self.services.cells_snapshot().await?;
        let fresh_domains = self.freshness_snapshot().await?;

        Ok((
            ConvergenceInput {
                desired,
                actuals,
                cells,
                fresh_domains,
            },
            invalid_keys,
        ))
    }

    /// Compute the reconciliation plan for a snapshot.
    pub fn calculate_convergence_changes(&self, input: &ConvergenceInput) -> ConvergenceChanges {
        let now = self.now();
        let mut changes = ConvergenceChanges::default();

        for (process_guid, records) in &input.actuals {
            for (index, lrp) in records {
                let fresh = input.is_fresh(&lrp.key.domain);
                let extra = *index >= input.desired_instances(process_guid);

                if extra {
                    if fresh {
                        info!(
                            process_guid = %process_guid,
                            index,
                            desired_instances = input.desired_instances(process_guid),
                            "detected-extra-instance",
                        );
                        changes.actual_lrps_for_extra_indices.push(lrp.clone());
                        continue;
                    }
                    info!(process_guid = %process_guid, index, domain = %lrp.key.domain, "skipping-unfresh-domain");
                    // An extra index in an unfresh domain may simply not be
                    // known desired yet; fall through to the
                    // actual-driven checks below.
                }

                match lrp.state {
                    ActualLRPState::Claimed | ActualLRPState::Running => {
                        if !input.cells.contains(&lrp.instance_key.cell_id) {
                            info!(
                                process_guid = %process_guid,
                                index,
                                cell_id = %lrp.instance_key.cell_id,
                                "detected-actual-with-missing-cell",
                            );
                            changes.actual_lrps_with_missing_cells.push(lrp.clone());
                        }
                    }
                    ActualLRPState::Crashed => {
                        if self.crash_policy.should_restart_now(lrp.crash_count, lrp.since, now) {
                            changes.restartable_crashed_actual_lrps.push(lrp.clone());
                        }
                    }
                    ActualLRPState::Unclaimed => {
                        let waiting = nanos_since(now, lrp.since);
                        if waiting >= self.convergence.stale_unclaimed_duration.as_nanos() as i64 {
                            changes.stale_unclaimed_actual_lrps.push(lrp.clone());
                        }
                    }
                }
            }
        }

        for (process_guid, desired) in &input.desired {
            if !input.is_fresh(&desired.domain) {
                continue;
            }
            let present = input.actuals.get(process_guid);
            for index in 0..desired.instances {
                let exists = present.is_some_and(|records| records.contains_key(&index));
                if !exists {
                    info!(process_guid = %process_guid, index, "detected-missing-instance");
                    changes
                        .actual_lrp_keys_for_missing_indices
                        .push(ActualLRPKey::new(process_guid.clone(), index, desired.domain.clone()));
                }
            }
        }

        changes
    }

    /// Run one full convergence pass.
    pub async fn converge_lrps(&self) {
        record_lrp_convergence_started();
        let start = self.now();

        let (input, invalid_keys) = match self.gather_lrp_convergence_input().await {
            Ok(gathered) => gathered,
            Err(err) => {
                error!(error = %err, "failed-gathering-lrp-convergence-input");
                return;
            }
        };

        let deleted = invalid_keys.len() as u64;
        if !invalid_keys.is_empty() {
            if let Err(err) = self.store.delete_multi(invalid_keys).await {
                error!(error = %err, "failed-pruning-invalid-lrps");
            }
        }

        let changes = self.calculate_convergence_changes(&input);
        let stopped = changes.actual_lrps_for_extra_indices.len() as u64;
        let kicked = self.apply_convergence_changes(&input, changes).await;

        let duration = nanos_since(self.now(), start) as u64;
        record_lrp_convergence(duration, deleted, kicked, stopped);
        info!(duration_nanos = duration, deleted, kicked, stopped, "lrp-convergence-pass-complete");
    }

    /// Apply a plan; returns the number of kicked records.
    async fn apply_convergence_changes(&self, input: &ConvergenceInput, changes: ConvergenceChanges) -> u64 {
        let mut auction_keys: Vec<ActualLRPKey> = Vec::new();

        // Unclaim records whose placement is gone (missing cell) or whose
        // back-off elapsed (restartable crash), with bounded fan-out.
        let mut pool: WorkPool<Option<ActualLRPKey>> = WorkPool::new(self.convergence.lrp_pool_size);
        for lrp in changes
            .actual_lrps_with_missing_cells
            .into_iter()
            .chain(changes.restartable_crashed_actual_lrps)
        {
            let store: Arc<dyn KeyValueStore> = self.store.clone();
            let clock: Arc<dyn Clock> = self.clock.clone();
            pool.submit(async move {
                let key = lrp.key.clone();
                match unclaim_instance_record(store, clock, key.clone()).await {
                    Ok(_) => Some(key),
                    Err(err) => {
                        error!(
                            process_guid = %key.process_guid,
                            index = key.index,
                            error = %err,
                            "failed-unclaiming-actual-lrp",
                        );
                        None
                    }
                }
            });
        }
        auction_keys.extend(pool.join_all().await.into_iter().flatten());

        // Seed records for missing indices.
        for key in changes.actual_lrp_keys_for_missing_indices {
            match self.create_unclaimed_actual_lrp(&key).await {
                Ok(()) => auction_keys.push(key),
                Err(err) => {
                    error!(
                        process_guid = %key.process_guid,
                        index = key.index,
                        error = %err,
                        "failed-creating-missing-actual-lrp",
                    );
                }
            }
        }

        // Stale unclaimed records only get their auction re-requested.
        auction_keys.extend(changes.stale_unclaimed_actual_lrps.into_iter().map(|lrp| lrp.key));

        // Retire extra indices through their cells.
        let retire_keys: Vec<ActualLRPKey> =
            changes.actual_lrps_for_extra_indices.iter().map(|lrp| lrp.key.clone()).collect();
        if !retire_keys.is_empty() {
            self.retire_actual_lrps(&retire_keys).await;
        }

        // One batched auction request for everything that needs placement.
        let kicked = auction_keys.len() as u64;
        let mut indices_by_guid: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        for key in auction_keys {
            indices_by_guid.entry(key.process_guid).or_default().push(key.index);
        }
        let mut starts = Vec::with_capacity(indices_by_guid.len());
        for (process_guid, mut indices) in indices_by_guid {
            indices.sort_unstable();
            indices.dedup();
            match input.desired.get(&process_guid) {
                Some(desired) => starts.push(LRPStartRequest::new(desired.clone(), indices)),
                None => {
                    warn!(process_guid = %process_guid, "skipping-auction-for-undesired-process");
                }
            }
        }
        self.request_lrp_auctions(starts).await;

        kicked
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keel_models::ActualLRPInstanceKey;

    use super::*;
    use crate::test_support::TestBbs;
    use crate::test_support::desired_lrp_with_instances;

    async fn freshen(harness: &TestBbs) {
        harness.bbs.upsert_domain("some-domain", 0).await.unwrap();
    }

    #[tokio::test]
    async fn a_converged_world_produces_an_empty_plan() {
        let harness = TestBbs::new();
        freshen(&harness).await;
        harness.seed_cell("cell-1").await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 1)).await.unwrap();
        harness
            .put_instance_lrp("some-guid", 0, ActualLRPState::Running, ActualLRPInstanceKey::new("ig-0", "cell-1"))
            .await;

        let (input, invalid) = harness.bbs.gather_lrp_convergence_input().await.unwrap();
        assert!(invalid.is_empty());
        let changes = harness.bbs.calculate_convergence_changes(&input);
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn missing_cells_are_detected_and_unclaimed() {
        let harness = TestBbs::new();
        freshen(&harness).await;
        harness.seed_cell("cell-2").await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 2)).await.unwrap();
        harness.auctioneer.clear();
        harness
            .put_instance_lrp("some-guid", 0, ActualLRPState::Running, ActualLRPInstanceKey::new("ig-0", "cell-1"))
            .await;
        harness
            .put_instance_lrp("some-guid", 1, ActualLRPState::Running, ActualLRPInstanceKey::new("ig-1", "cell-1"))
            .await;

        let (input, _) = harness.bbs.gather_lrp_convergence_input().await.unwrap();
        let changes = harness.bbs.calculate_convergence_changes(&input);
        assert_eq!(changes.actual_lrps_with_missing_cells.len(), 2);
        assert!(changes.actual_lrp_keys_for_missing_indices.is_empty());
        assert!(changes.actual_lrps_for_extra_indices.is_empty());
        assert!(changes.restartable_crashed_actual_lrps.is_empty());
        assert!(changes.stale_unclaimed_actual_lrps.is_empty());

        harness.bbs.converge_lrps().await;

        for index in 0..2 {
            let lrp = harness.instance_lrp("some-guid", index).await;
            assert_eq!(lrp.state, ActualLRPState::Unclaimed, "index {index}");
            assert!(lrp.instance_key.is_empty());
        }

        let requests = harness.auctioneer.lrp_requests();
        assert_eq!(requests.len(), 1, "one batched auction call");
        assert_eq!(requests[0].1.len(), 1);
        assert_eq!(requests[0].1[0].indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn missing_indices_are_created_and_auctioned() {
        let harness = TestBbs::new();
        freshen(&harness).await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 3)).await.unwrap();
        harness.auctioneer.clear();
        harness
            .put_instance_lrp("some-guid", 1, ActualLRPState::Running, ActualLRPInstanceKey::new("ig-1", "cell-1"))
            .await;
        harness.seed_cell("cell-1").await;

        harness.bbs.converge_lrps().await;

        assert_eq!(harness.instance_lrp("some-guid", 0).await.state, ActualLRPState::Unclaimed);
        assert_eq!(harness.instance_lrp("some-guid", 2).await.state, ActualLRPState::Unclaimed);
        assert_eq!(harness.auctioneer.requested_indices(), vec![
            ("some-guid".to_string(), 0),
            ("some-guid".to_string(), 2),
        ]);
    }

    #[tokio::test]
    async fn missing_indices_require_freshness() {
        let harness = TestBbs::new();
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 2)).await.unwrap();
        harness.auctioneer.clear();

        harness.bbs.converge_lrps().await;

        assert!(harness.try_instance_lrp("some-guid", 0).await.is_none());
        assert!(harness.auctioneer.lrp_requests().is_empty());
    }

    #[tokio::test]
    async fn extra_indices_respect_freshness() {
        let harness = TestBbs::new();
        harness.seed_cell("cell-1").await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 2)).await.unwrap();
        for index in 0..3 {
            harness
                .put_instance_lrp(
                    "some-guid",
                    index,
                    ActualLRPState::Running,
                    ActualLRPInstanceKey::new(format!("ig-{index}"), "cell-1"),
                )
                .await;
        }

        // Domain not fresh: no retirement.
        harness.bbs.converge_lrps().await;
        assert!(harness.cells.stops().is_empty());

        // Fresh: index 2 is retired through its cell.
        freshen(&harness).await;
        harness.bbs.converge_lrps().await;

        let stops = harness.cells.stops();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].1, ActualLRPKey::new("some-guid", 2, "some-domain"));
    }

    #[tokio::test]
    async fn undesired_processes_are_retired_only_when_fresh() {
        let harness = TestBbs::new();
        harness.seed_cell("cell-1").await;
        harness
            .put_instance_lrp("orphan-guid", 0, ActualLRPState::Running, ActualLRPInstanceKey::new("ig-0", "cell-1"))
            .await;

        harness.bbs.converge_lrps().await;
        assert!(harness.cells.stops().is_empty());

        freshen(&harness).await;
        harness.bbs.converge_lrps().await;
        assert_eq!(harness.cells.stops().len(), 1);
    }

    #[tokio::test]
    async fn restartable_crashed_records_are_unclaimed_and_auctioned() {
        let harness = TestBbs::new();
        freshen(&harness).await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 1)).await.unwrap();
        harness.auctioneer.clear();

        let mut crashed = keel_models::ActualLRP::new_unclaimed(
            ActualLRPKey::new("some-guid", 0, "some-domain"),
            harness.clock.now_nanos(),
        );
        crashed.state = ActualLRPState::Crashed;
        crashed.crash_count = 2;
        harness.put_raw_instance_lrp(&crashed).await;

        harness.bbs.converge_lrps().await;

        assert_eq!(harness.instance_lrp("some-guid", 0).await.state, ActualLRPState::Unclaimed);
        assert_eq!(harness.auctioneer.requested_indices(), vec![("some-guid".to_string(), 0)]);
    }

    #[tokio::test]
    async fn crashed_records_in_backoff_are_left_alone() {
        let harness = TestBbs::new();
        freshen(&harness).await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 1)).await.unwrap();
        harness.auctioneer.clear();

        let mut crashed = keel_models::ActualLRP::new_unclaimed(
            ActualLRPKey::new("some-guid", 0, "some-domain"),
            harness.clock.now_nanos(),
        );
        crashed.state = ActualLRPState::Crashed;
        crashed.crash_count = 5;
        harness.put_raw_instance_lrp(&crashed).await;

        harness.bbs.converge_lrps().await;
        assert_eq!(harness.instance_lrp("some-guid", 0).await.state, ActualLRPState::Crashed);

        // After the back-off (60s for the fifth crash) it restarts.
        harness.clock.advance(Duration::from_secs(61));
        harness.bbs.converge_lrps().await;
        assert_eq!(harness.instance_lrp("some-guid", 0).await.state, ActualLRPState::Unclaimed);
    }

    #[tokio::test]
    async fn stale_unclaimed_records_are_reauctioned_without_mutation() {
        let harness = TestBbs::new();
        freshen(&harness).await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 1)).await.unwrap();
        harness.bbs.create_unclaimed_actual_lrp(&ActualLRPKey::new("some-guid", 0, "some-domain")).await.unwrap();
        harness.auctioneer.clear();

        harness.bbs.converge_lrps().await;
        assert!(harness.auctioneer.lrp_requests().is_empty(), "fresh unclaimed is not stale");

        harness.clock.advance(Duration::from_secs(31));
        let tag_before = harness.instance_lrp("some-guid", 0).await.modification_tag;
        harness.bbs.converge_lrps().await;

        assert_eq!(harness.auctioneer.requested_indices(), vec![("some-guid".to_string(), 0)]);
        assert_eq!(harness.instance_lrp("some-guid", 0).await.modification_tag, tag_before);
    }

    #[tokio::test]
    async fn invalid_payloads_are_pruned() {
        let harness = TestBbs::new();
        harness
            .store
            .set(keel_core::StoreNode::new("/v1/desired/bad", "not json"))
            .await
            .unwrap();
        harness
            .store
            .set(keel_core::StoreNode::new("/v1/actual/bad/0/instance", "not json"))
            .await
            .unwrap();

        harness.bbs.converge_lrps().await;

        assert!(harness.store.get("/v1/desired/bad").await.is_err());
        assert!(harness.store.get("/v1/actual/bad/0/instance").await.is_err());
    }

    #[tokio::test]
    async fn convergence_is_idempotent() {
        let harness = TestBbs::new();
        freshen(&harness).await;
        harness.seed_cell("cell-2").await;
        harness.bbs.desire_lrp(&desired_lrp_with_instances("some-guid", 1)).await.unwrap();
        harness
            .put_instance_lrp("some-guid", 0, ActualLRPState::Running, ActualLRPInstanceKey::new("ig-0", "gone-cell"))
            .await;

        harness.bbs.converge_lrps().await;
        let after_first = harness.instance_lrp("some-guid", 0).await;

        harness.auctioneer.clear();
        harness.bbs.converge_lrps().await;

        // Second pass on the unchanged world: no mutation, no requests.
        assert_eq!(harness.instance_lrp("some-guid", 0).await, after_first);
        assert!(harness.auctioneer.lrp_requests().is_empty());
        assert!(harness.cells.stops().is_empty());
    }
}
