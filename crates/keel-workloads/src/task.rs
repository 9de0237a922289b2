//! Task store and lifecycle.

use keel_core::StoreNode;
use keel_core::retry_on_timeout;
use keel_core::schema;
use keel_models::ModelError;
use keel_models::Task;
use keel_models::TaskState;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::bbs::Bbs;
use crate::error::Result;

/// Failure reason recorded when a pending task is never started.
pub const TASK_EXPIRED_REASON: &str = "not started within time limit";
/// Failure reason recorded when a running task's cell vanishes.
pub const TASK_CELL_DISAPPEARED_REASON: &str = "cell disappeared before completion";
/// Failure reason recorded for cancelled tasks.
pub const TASK_CANCELLED_REASON: &str = "task was cancelled";

impl Bbs {
    /// Declare a new one-shot workload.
    ///
    /// On success a task auction is requested; auction failure is logged
    /// only, convergence re-requests pending tasks.
    pub async fn desire_task(&self, task: &Task) -> Result<()> {
        task.validate()?;

        let mut record = task.clone();
        record.state = TaskState::Pending;
        record.cell_id = String::new();
        if record.created_at == 0 {
            record.created_at = self.now();
        }
        record.updated_at = self.now();

        let value = serde_json::to_string(&record).map_err(ModelError::from)?;
        let key = schema::task_path(&record.task_guid);
        retry_on_timeout(|| self.store.create(StoreNode::new(&key, &value))).await?;
        info!(task_guid = %record.task_guid, "task-desired");

        self.request_task_auctions(vec![record]).await;
        Ok(())
    }

    /// A cell starts running a task.
    ///
    /// Returns false (no change) when the task is already Running on the
    /// same cell, making retried starts safe and keeping callback delivery
    /// at-most-once.
    pub async fn start_task(&self, task_guid: &str, cell_id: &str) -> Result<bool> {
        if cell_id.is_empty() {
            return Err(ModelError::invalid_field("cell_id").into());
        }
        let (task, store_index) = self.fetch_task(task_guid).await?;

        if task.state == TaskState::Running && task.cell_id == cell_id {
            return Ok(false);
        }
        if !task.state.allows_transition_to(TaskState::Running) {
            return Err(ModelError::TaskStateTransition {
                from: task.state,
                to: TaskState::Running,
            }
            .into());
        }

        let mut started = task;
        started.state = TaskState::Running;
        started.cell_id = cell_id.to_string();
        started.updated_at = self.now();
        self.swap_task(&started, store_index).await?;
        info!(task_guid = %task_guid, cell_id = %cell_id, "task-started");
        Ok(true)
    }

    /// The running cell reports a task finished.
    pub async fn complete_task(
        &self,
        task_guid: &str,
        cell_id: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<()> {
        let (task, store_index) = self.fetch_task(task_guid).await?;

        if !task.state.allows_transition_to(TaskState::Completed) {
            return Err(ModelError::TaskStateTransition {
                from: task.state,
                to: TaskState::Completed,
            }
            .into());
        }
        if task.cell_id != cell_id {
            return Err(ModelError::TaskRunningOnDifferentCell.into());
        }

        let completed = self.mark_task_completed(task, failed, failure_reason, result);
        self.swap_task(&completed, store_index).await?;
        info!(task_guid = %task_guid, failed, "task-completed");

        self.deliver_completion_callback(vec![completed]).await;
        Ok(())
    }

    /// Force a task from Pending or Running to Completed+failed.
    pub async fn fail_task(&self, task_guid: &str, failure_reason: &str) -> Result<()> {
        let (task, store_index) = self.fetch_task(task_guid).await?;

        if !matches!(task.state, TaskState::Pending | TaskState::Running) {
            return Err(ModelError::TaskStateTransition {
                from: task.state,
                to: TaskState::Completed,
            }
            .into());
        }

        let failed = self.mark_task_completed(task, true, failure_reason, "");
        self.swap_task(&failed, store_index).await?;
        info!(task_guid = %task_guid, reason = %failure_reason, "task-failed");

        self.deliver_completion_callback(vec![failed]).await;
        Ok(())
    }

    /// Cancel a task, aborting in-flight execution best-effort.
    pub async fn cancel_task(&self, task_guid: &str) -> Result<()> {
        let (task, store_index) = self.fetch_task(task_guid).await?;

        if !matches!(task.state, TaskState::Pending | TaskState::Running) {
            return Err(ModelError::TaskStateTransition {
                from: task.state,
                to: TaskState::Completed,
            }
            .into());
        }
        let running_cell = if task.state == TaskState::Running {
            Some(task.cell_id.clone())
        } else {
            None
        };

        let cancelled = self.mark_task_completed(task, true, TASK_CANCELLED_REASON, "");
        self.swap_task(&cancelled, store_index).await?;
        info!(task_guid = %task_guid, "task-cancelled");

        if let Some(cell_id) = running_cell {
            match self.services.cell_by_id(&cell_id).await {
                Ok(cell) => {
                    if let Err(err) = self.cell_client.cancel_task(&cell.rep_address, task_guid).await {
                        error!(task_guid = %task_guid, cell_id = %cell_id, error = %err, "failed-cancelling-task-on-cell");
                    }
                }
                Err(err) => {
                    error!(task_guid = %task_guid, cell_id = %cell_id, error = %err, "failed-finding-cell-for-cancel");
                }
            }
        }

        self.deliver_completion_callback(vec![cancelled]).await;
        Ok(())
    }

    /// A handler claims a completed task for resolution.
    pub async fn resolving_task(&self, task_guid: &str) -> Result<()> {
        let (task, store_index) = self.fetch_task(task_guid).await?;

        if !task.state.allows_transition_to(TaskState::Resolving) {
            return Err(ModelError::TaskCannotBeResolved { from: task.state }.into());
        }

        let mut resolving = task;
        resolving.state = TaskState::Resolving;
        resolving.updated_at = self.now();
        self.swap_task(&resolving, store_index).await?;
        Ok(())
    }

    /// Resolution finished; the task record is deleted.
    pub async fn resolve_task(&self, task_guid: &str) -> Result<()> {
        let (task, _) = self.fetch_task(task_guid).await?;

        if task.state != TaskState::Resolving {
            return Err(ModelError::TaskCannotBeResolved { from: task.state }.into());
        }

        let path = schema::task_path(task_guid);
        retry_on_timeout(|| self.store.delete(&path)).await?;
        info!(task_guid = %task_guid, "task-resolved");
        Ok(())
    }

    /// All tasks. Undecodable entries are skipped with a log; pruning them
    /// is convergence's job.
    pub async fn tasks(&self) -> Result<Vec<Task>> {
        let nodes = self.store.list_recursively(schema::TASK_ROOT).await?;
        let mut tasks = Vec::with_capacity(nodes.len());
        for node in nodes {
            match Task::from_json(&node.value) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    warn!(key = %node.key, error = %err, "skipping-invalid-task");
                }
            }
        }
        Ok(tasks)
    }

    /// Tasks in one domain.
    pub async fn tasks_by_domain(&self, domain: &str) -> Result<Vec<Task>> {
        if domain.is_empty() {
            return Err(ModelError::invalid_field("domain").into());
        }
        Ok(self.tasks().await?.into_iter().filter(|task| task.domain == domain).collect())
    }

    /// Tasks placed on one cell.
    pub async fn tasks_by_cell_id(&self, cell_id: &str) -> Result<Vec<Task>> {
        if cell_id.is_empty() {
            return Err(ModelError::invalid_field("cell_id").into());
        }
        Ok(self.tasks().await?.into_iter().filter(|task| task.cell_id == cell_id).collect())
    }

    /// One task by guid.
    pub async fn task_by_guid(&self, task_guid: &str) -> Result<Task> {
        let (task, _) = self.fetch_task(task_guid).await?;
        Ok(task)
    }

    pub(crate) async fn fetch_task(&self, task_guid: &str) -> Result<(Task, u64)> {
        if task_guid.is_empty() {
            return Err(ModelError::invalid_field("task_guid").into());
        }
        let node = self.store.get(&schema::task_path(task_guid)).await?;
        let task = Task::from_json(&node.value)?;
        Ok((task, node.index))
    }

    pub(crate) async fn swap_task(&self, task: &Task, store_index: u64) -> Result<()> {
        let value = serde_json::to_string(task).map_err(ModelError::from)?;
        let node = StoreNode::new(schema::task_path(&task.task_guid), value);
        retry_on_timeout(|| self.store.compare_and_swap_by_index(store_index, node.clone())).await?;
        Ok(())
    }

    pub(crate) fn mark_task_completed(&self, task: Task, failed: bool, failure_reason: &str, result: &str) -> Task {
        let mut completed = task;
        completed.state = TaskState::Completed;
        completed.failed = failed;
        completed.failure_reason = failure_reason.to_string();
        completed.result = result.to_string();
        completed.updated_at = self.now();
        completed.first_completed_at = self.now();
        completed
    }

    /// Post completed tasks to a receptor's callback handler.
    ///
    /// Tasks with no callback URL are only bookkept, never posted. Failures
    /// are logged; task convergence re-delivers.
    pub(crate) async fn deliver_completion_callback(&self, tasks: Vec<Task>) {
        let with_callbacks: Vec<Task> = tasks.into_iter().filter(|task| task.completion_callback_url.is_some()).collect();
        if with_callbacks.is_empty() {
            return;
        }

        let receptor = match self.services.receptor().await {
            Ok(receptor) => receptor,
            Err(err) => {
                error!(error = %err, "failed-to-find-receptor");
                return;
            }
        };

        if let Err(err) = self.task_callback_client.complete_tasks(&receptor.receptor_url, with_callbacks).await {
            error!(error = %err, "failed-delivering-task-callbacks");
        }
    }
}
