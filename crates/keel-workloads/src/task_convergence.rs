//! Task convergence: the periodic sweep over all task records.

use std::time::Duration;

use keel_core::WorkPool;
use keel_core::nanos_since;
use keel_core::schema;
use keel_models::Task;
use keel_models::TaskState;
use tracing::error;
use tracing::info;

use crate::bbs::Bbs;
use crate::metrics::record_task_convergence;
use crate::metrics::record_task_convergence_started;
use crate::task::TASK_CELL_DISAPPEARED_REASON;
use crate::task::TASK_EXPIRED_REASON;

struct CompareAndSwappableTask {
    store_index: u64,
    task: Task,
}

impl Bbs {
    /// Run one task convergence pass.
    ///
    /// * Pending tasks older than `expire_pending_task_duration` are failed.
    /// * Pending tasks quiet for `convergence_interval` get re-auctioned.
    /// * Running tasks whose cell vanished are failed.
    /// * Completed/Resolving tasks older than `time_to_resolve` are deleted.
    /// * Quiet Completed tasks get their callback re-delivered; quiet
    ///   Resolving tasks are demoted to Completed first (the handler is
    ///   presumed crashed).
    /// * Undecodable records are pruned.
    pub async fn converge_tasks(
        &self,
        expire_pending_task_duration: Duration,
        convergence_interval: Duration,
        time_to_resolve: Duration,
    ) {
        record_task_convergence_started();
        let start = self.now();

        let task_nodes = match self.store.list_recursively(schema::TASK_ROOT).await {
            Ok(nodes) => nodes,
            Err(err) => {
                error!(error = %err, "failed-listing-tasks");
                return;
            }
        };
        let cells = match self.services.cells_snapshot().await {
            Ok(cells) => cells,
            Err(err) => {
                error!(error = %err, "failed-loading-cell-set");
                return;
            }
        };

        let now = self.now();
        let expire_nanos = expire_pending_task_duration.as_nanos() as i64;
        let kick_nanos = convergence_interval.as_nanos() as i64;
        let resolve_nanos = time_to_resolve.as_nanos() as i64;

        let mut keys_to_delete: Vec<String> = Vec::new();
        let mut tasks_to_cas: Vec<CompareAndSwappableTask> = Vec::new();
        let mut tasks_to_complete: Vec<Task> = Vec::new();
        let mut tasks_to_auction: Vec<Task> = Vec::new();
        let mut kicked: u64 = 0;

        for node in task_nodes {
            let task = match Task::from_json(&node.value) {
                Ok(task) => task,
                Err(err) => {
                    info!(key = %node.key, error = %err, "pruning-invalid-task");
                    keys_to_delete.push(node.key);
                    continue;
                }
            };

            let since_created = nanos_since(now, task.created_at);
            let since_updated = nanos_since(now, task.updated_at);
            let since_first_completed = if task.first_completed_at == 0 {
                0
            } else {
                nanos_since(now, task.first_completed_at)
            };
            let should_kick = since_updated >= kick_nanos;

            match task.state {
                TaskState::Pending => {
                    if since_created >= expire_nanos {
                        info!(task_guid = %task.task_guid, "failing-expired-pending-task");
                        let failed = self.mark_task_completed(task, true, TASK_EXPIRED_REASON, "");
                        tasks_to_cas.push(CompareAndSwappableTask {
                            store_index: node.index,
                            task: failed,
                        });
                        kicked += 1;
                    } else if should_kick {
                        info!(task_guid = %task.task_guid, "requesting-auction-for-pending-task");
                        tasks_to_auction.push(task);
                        kicked += 1;
                    }
                }
                TaskState::Running => {
                    if !cells.contains(&task.cell_id) {
                        info!(task_guid = %task.task_guid, cell_id = %task.cell_id, "failing-task-with-missing-cell");
                        let failed = self.mark_task_completed(task, true, TASK_CELL_DISAPPEARED_REASON, "");
                        tasks_to_cas.push(CompareAndSwappableTask {
                            store_index: node.index,
                            task: failed,
                        });
                        kicked += 1;
                    }
                }
                TaskState::Completed => {
                    if since_first_completed >= resolve_nanos {
                        info!(task_guid = %task.task_guid, "deleting-unresolved-completed-task");
                        keys_to_delete.push(node.key);
                    } else if should_kick {
                        info!(task_guid = %task.task_guid, "redelivering-completion-callback");
                        tasks_to_complete.push(task);
                        kicked += 1;
                    }
                }
                TaskState::Resolving => {
                    if since_first_completed >= resolve_nanos {
                        info!(task_guid = %task.task_guid, "deleting-stuck-resolving-task");
                        keys_to_delete.push(node.key);
                    } else if should_kick {
                        info!(task_guid = %task.task_guid, "demoting-resolving-task-to-completed");
                        let mut demoted = task;
                        demoted.state = TaskState::Completed;
                        tasks_to_cas.push(CompareAndSwappableTask {
                            store_index: node.index,
                            task: demoted.clone(),
                        });
                        tasks_to_complete.push(demoted);
                        kicked += 1;
                    }
                }
            }
        }

        self.request_task_auctions(tasks_to_auction).await;
        self.batch_compare_and_swap_tasks(tasks_to_cas).await;
        self.deliver_completion_callback(tasks_to_complete).await;

        let pruned = keys_to_delete.len() as u64;
        if !keys_to_delete.is_empty() {
            if let Err(err) = self.store.delete_multi(keys_to_delete).await {
                error!(error = %err, "failed-pruning-tasks");
            }
        }

        let duration = nanos_since(self.now(), start) as u64;
        record_task_convergence(duration, kicked, pruned);
        info!(duration_nanos = duration, kicked, pruned, "task-convergence-pass-complete");
    }

    /// Apply the CAS batch with bounded fan-out.
    async fn batch_compare_and_swap_tasks(&self, batch: Vec<CompareAndSwappableTask>) {
        if batch.is_empty() {
            return;
        }

        let mut pool: WorkPool<()> = WorkPool::new(self.convergence.task_pool_size);
        let now = self.now();
        for entry in batch {
            let store = self.store.clone();
            let mut task = entry.task;
            task.updated_at = now;
            let store_index = entry.store_index;
            pool.submit(async move {
                let value = match serde_json::to_string(&task) {
                    Ok(value) => value,
                    Err(err) => {
                        error!(task_guid = %task.task_guid, error = %err, "failed-encoding-task");
                        return;
                    }
                };
                let node = keel_core::StoreNode::new(schema::task_path(&task.task_guid), value);
                if let Err(err) = store.compare_and_swap_by_index(store_index, node).await {
                    error!(task_guid = %task.task_guid, error = %err, "failed-to-compare-and-swap-task");
                }
            });
        }
        pool.join_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::KeyValueStore;
    use crate::test_support::TestBbs;
    use crate::test_support::task_with_guid;

    const EXPIRE: Duration = Duration::from_secs(30);
    const INTERVAL: Duration = Duration::from_secs(30);
    const TIME_TO_RESOLVE: Duration = Duration::from_secs(300);

    async fn converge(harness: &TestBbs) {
        harness.bbs.converge_tasks(EXPIRE, INTERVAL, TIME_TO_RESOLVE).await;
    }

    #[tokio::test]
    async fn young_pending_tasks_are_left_alone() {
        let harness = TestBbs::new();
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.auctioneer.clear();

        converge(&harness).await;

        assert_eq!(harness.bbs.task_by_guid("t-1").await.unwrap().state, TaskState::Pending);
        assert!(harness.auctioneer.task_requests().is_empty());
    }

    #[tokio::test]
    async fn expired_pending_tasks_are_failed() {
        let harness = TestBbs::new();
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();

        harness.clock.advance(Duration::from_secs(31));
        converge(&harness).await;

        let task = harness.bbs.task_by_guid("t-1").await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.failed);
        assert!(task.failure_reason.contains("time limit"));
    }

    #[tokio::test]
    async fn quiet_pending_tasks_get_reauctioned() {
        let harness = TestBbs::new();
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.auctioneer.clear();

        harness.clock.advance(Duration::from_secs(31));
        harness
            .bbs
            .converge_tasks(Duration::from_secs(300), INTERVAL, TIME_TO_RESOLVE)
            .await;

        let requests = harness.auctioneer.task_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1[0].task_guid, "t-1");
        assert_eq!(harness.bbs.task_by_guid("t-1").await.unwrap().state, TaskState::Pending);
    }

    #[tokio::test]
    async fn running_tasks_with_live_cells_are_left_alone() {
        let harness = TestBbs::new();
        harness.seed_cell("cell-1").await;
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.bbs.start_task("t-1", "cell-1").await.unwrap();

        harness.clock.advance(Duration::from_secs(3600));
        converge(&harness).await;

        assert_eq!(harness.bbs.task_by_guid("t-1").await.unwrap().state, TaskState::Running);
    }

    #[tokio::test]
    async fn running_tasks_on_dead_cells_are_failed() {
        let harness = TestBbs::new();
        harness.seed_cell("cell-1").await;
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.bbs.start_task("t-1", "cell-1").await.unwrap();
        harness.remove_cell("cell-1");

        converge(&harness).await;

        let task = harness.bbs.task_by_guid("t-1").await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.failed);
        assert!(task.failure_reason.contains("cell disappeared"));
    }

    #[tokio::test]
    async fn quiet_completed_tasks_get_their_callback_redelivered() {
        let harness = TestBbs::new();
        harness.seed_receptor("http://receptor.example.com");
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.bbs.start_task("t-1", "cell-1").await.unwrap();
        harness.callbacks.set_failing(true);
        harness.bbs.complete_task("t-1", "cell-1", false, "", "done").await.unwrap();
        harness.callbacks.set_failing(false);

        harness.clock.advance(Duration::from_secs(31));
        converge(&harness).await;

        let deliveries = harness.callbacks.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1[0].task_guid, "t-1");
    }

    #[tokio::test]
    async fn old_completed_tasks_are_deleted() {
        let harness = TestBbs::new();
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.bbs.start_task("t-1", "cell-1").await.unwrap();
        harness.bbs.complete_task("t-1", "cell-1", false, "", "done").await.unwrap();

        harness.clock.advance(Duration::from_secs(301));
        converge(&harness).await;

        assert!(harness.bbs.task_by_guid("t-1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn stuck_resolving_tasks_are_demoted_and_redelivered() {
        let harness = TestBbs::new();
        harness.seed_receptor("http://receptor.example.com");
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.bbs.start_task("t-1", "cell-1").await.unwrap();
        harness.bbs.complete_task("t-1", "cell-1", false, "", "done").await.unwrap();
        harness.bbs.resolving_task("t-1").await.unwrap();
        harness.callbacks.set_failing(false);
        let deliveries_before = harness.callbacks.deliveries().len();

        harness.clock.advance(Duration::from_secs(31));
        converge(&harness).await;

        assert_eq!(harness.bbs.task_by_guid("t-1").await.unwrap().state, TaskState::Completed);
        assert_eq!(harness.callbacks.deliveries().len(), deliveries_before + 1);
    }

    #[tokio::test]
    async fn old_resolving_tasks_are_deleted() {
        let harness = TestBbs::new();
        harness.bbs.desire_task(&task_with_guid("t-1")).await.unwrap();
        harness.bbs.start_task("t-1", "cell-1").await.unwrap();
        harness.bbs.complete_task("t-1", "cell-1", false, "", "done").await.unwrap();
        harness.bbs.resolving_task("t-1").await.unwrap();

        harness.clock.advance(Duration::from_secs(301));
        converge(&harness).await;

        assert!(harness.bbs.task_by_guid("t-1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn invalid_task_payloads_are_pruned() {
        let harness = TestBbs::new();
        harness
            .store
            .set(keel_core::StoreNode::new("/v1/task/garbage", "not json"))
            .await
            .unwrap();

        converge(&harness).await;
        assert!(harness.store.get("/v1/task/garbage").await.is_err());
    }
}
