//! Desired-LRP store.

use keel_core::StoreError;
use keel_core::StoreNode;
use keel_core::retry_on_timeout;
use keel_core::schema;
use keel_models::ActualLRPKey;
use keel_models::DesiredLRP;
use keel_models::DesiredLRPUpdate;
use keel_models::LRPStartRequest;
use keel_models::ModelError;
use keel_models::ModificationTag;
use tracing::info;
use tracing::warn;

use crate::bbs::Bbs;
use crate::error::Result;

impl Bbs {
    /// Declare a new workload.
    ///
    /// On success an auction is requested for every index; auction failure
    /// is logged only, convergence re-requests missing instances.
    pub async fn desire_lrp(&self, lrp: &DesiredLRP) -> Result<()> {
        lrp.validate()?;

        let mut record = lrp.clone();
        record.modification_tag = ModificationTag::fresh();
        let value = serde_json::to_string(&record).map_err(ModelError::from)?;
        let key = schema::desired_lrp_path(&record.process_guid);

        retry_on_timeout(|| self.store.create(StoreNode::new(&key, &value))).await?;
        info!(process_guid = %record.process_guid, instances = record.instances, "desired-lrp-created");

        if record.instances > 0 {
            let indices: Vec<i32> = (0..record.instances).collect();
            self.request_lrp_auctions(vec![LRPStartRequest::new(record, indices)]).await;
        }
        Ok(())
    }

    /// Apply `{instances?, routes?, annotation?}` to an existing workload.
    ///
    /// Runs a CAS loop against concurrent updaters. Growth requests
    /// auctions for the new indices; shrinkage retires the excess actuals.
    pub async fn update_desired_lrp(&self, process_guid: &str, update: &DesiredLRPUpdate) -> Result<()> {
        loop {
            let (existing, store_index) = self.fetch_desired_lrp(process_guid).await?;

            let mut updated = existing.apply_update(update);
            existing.validate_modifications(&updated)?;
            updated.validate()?;
            updated.modification_tag.increment();

            let value = serde_json::to_string(&updated).map_err(ModelError::from)?;
            let node = StoreNode::new(schema::desired_lrp_path(process_guid), value);

            match self.store.compare_and_swap_by_index(store_index, node).await {
                Ok(()) => {
                    info!(process_guid = %process_guid, instances = updated.instances, "desired-lrp-updated");
                    self.reconcile_instance_count(&updated, existing.instances).await;
                    return Ok(());
                }
                Err(StoreError::ComparisonFailed { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Remove a workload and retire all of its actuals.
    pub async fn remove_desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<()> {
        let (_, _) = self.fetch_desired_lrp(process_guid).await?;
        let path = schema::desired_lrp_path(process_guid);
        retry_on_timeout(|| self.store.delete(&path)).await?;
        info!(process_guid = %process_guid, "desired-lrp-removed");

        let groups = self.actual_lrp_groups_by_process_guid(process_guid).await?;
        let keys: Vec<ActualLRPKey> = groups
            .values()
            .filter_map(|group| group.instance.as_ref())
            .map(|lrp| lrp.key.clone())
            .collect();
        self.retire_actual_lrps(&keys).await;
        Ok(())
    }

    /// All desired LRPs. Undecodable entries are skipped with a log;
    /// pruning them is convergence's job.
    pub async fn desired_lrps(&self) -> Result<Vec<DesiredLRP>> {
        let nodes = self.store.list_recursively(schema::DESIRED_LRP_ROOT).await?;
        let mut lrps = Vec::with_capacity(nodes.len());
        for node in nodes {
            match DesiredLRP::from_json(&node.value) {
                Ok(lrp) => lrps.push(lrp),
                Err(err) => {
                    warn!(key = %node.key, error = %err, "skipping-invalid-desired-lrp");
                }
            }
        }
        Ok(lrps)
    }

    /// Desired LRPs in one domain.
    pub async fn desired_lrps_by_domain(&self, domain: &str) -> Result<Vec<DesiredLRP>> {
        if domain.is_empty() {
            return Err(ModelError::invalid_field("domain").into());
        }
        Ok(self.desired_lrps().await?.into_iter().filter(|lrp| lrp.domain == domain).collect())
    }

    /// The desired LRP for one guid.
    pub async fn desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<DesiredLRP> {
        if process_guid.is_empty() {
            return Err(ModelError::invalid_field("process_guid").into());
        }
        let (lrp, _) = self.fetch_desired_lrp(process_guid).await?;
        Ok(lrp)
    }

    /// Issue the auction or retirement that makes the actual instance set
    /// follow a changed `instances` count.
    async fn reconcile_instance_count(&self, updated: &DesiredLRP, previous_instances: i32) {
        if updated.instances > previous_instances {
            let indices: Vec<i32> = (previous_instances..updated.instances).collect();
            self.request_lrp_auctions(vec![LRPStartRequest::new(updated.clone(), indices)]).await;
        } else if updated.instances < previous_instances {
            let keys: Vec<ActualLRPKey> = (updated.instances..previous_instances)
                .map(|index| ActualLRPKey::new(updated.process_guid.clone(), index, updated.domain.clone()))
                .collect();
            self.retire_actual_lrps(&keys).await;
        }
    }
}
