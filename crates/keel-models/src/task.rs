//! One-shot workloads.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::actions::Action;
use crate::desired_lrp::MAXIMUM_ANNOTATION_LENGTH;
use crate::error::ModelError;
use crate::guid::is_valid_guid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Completed,
    Resolving,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Resolving => "RESOLVING",
        };
        f.write_str(name)
    }
}

impl TaskState {
    /// The strict transition chain: Pending → Running → Completed →
    /// Resolving. Everything else is rejected.
    pub fn allows_transition_to(&self, to: TaskState) -> bool {
        matches!(
            (self, to),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Completed, TaskState::Resolving)
        )
    }
}

/// A one-shot workload, stored at `/v1/task/<task_guid>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub task_guid: String,
    pub domain: String,
    pub root_fs: String,
    pub stack: String,
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub cpu_weight: u32,
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub annotation: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub first_completed_at: i64,
    pub state: TaskState,
}

impl Task {
    /// Decode and validate a stored payload.
    pub fn from_json(payload: &str) -> Result<Self, ModelError> {
        let task: Task = serde_json::from_str(payload)?;
        task.validate()?;
        Ok(task)
    }

    /// Field-level validation, first failure wins.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.domain.is_empty() {
            return Err(ModelError::invalid_field("domain"));
        }
        if !is_valid_guid(&self.task_guid) {
            return Err(ModelError::invalid_field("task_guid"));
        }
        if self.root_fs.is_empty() {
            return Err(ModelError::invalid_field("root_fs"));
        }
        if self.stack.is_empty() {
            return Err(ModelError::invalid_field("stack"));
        }
        match &self.action {
            None => return Err(ModelError::invalid_field("action")),
            Some(action) => action.validate()?,
        }
        if self.memory_mb < 0 {
            return Err(ModelError::invalid_field("memory_mb"));
        }
        if self.disk_mb < 0 {
            return Err(ModelError::invalid_field("disk_mb"));
        }
        if self.cpu_weight > 100 {
            return Err(ModelError::invalid_field("cpu_weight"));
        }
        if self.annotation.len() > MAXIMUM_ANNOTATION_LENGTH {
            return Err(ModelError::invalid_field("annotation"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_task() -> Task {
        Task {
            task_guid: "some-task-guid".to_string(),
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
            completion_callback_url: Some("http://receptor.example.com/task_callback".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn valid_task_passes() {
        assert!(valid_task().validate().is_ok());
    }

    #[test]
    fn task_guid_charset_enforced() {
        for bad in ["", "has/slash", "has.dot"] {
            let mut task = valid_task();
            task.task_guid = bad.to_string();
            assert_eq!(
                task.validate().unwrap_err(),
                ModelError::invalid_field("task_guid"),
                "guid {bad:?} should be rejected",
            );
        }
    }

    #[test]
    fn empty_domain_rejected() {
        let mut task = valid_task();
        task.domain = String::new();
        assert_eq!(task.validate().unwrap_err(), ModelError::invalid_field("domain"));
    }

    #[test]
    fn missing_action_rejected() {
        let mut task = valid_task();
        task.action = None;
        assert_eq!(task.validate().unwrap_err(), ModelError::invalid_field("action"));
    }

    #[test]
    fn state_chain_is_strict() {
        assert!(TaskState::Pending.allows_transition_to(TaskState::Running));
        assert!(TaskState::Running.allows_transition_to(TaskState::Completed));
        assert!(TaskState::Completed.allows_transition_to(TaskState::Resolving));

        assert!(!TaskState::Pending.allows_transition_to(TaskState::Completed));
        assert!(!TaskState::Running.allows_transition_to(TaskState::Pending));
        assert!(!TaskState::Resolving.allows_transition_to(TaskState::Completed));
        assert!(!TaskState::Completed.allows_transition_to(TaskState::Running));
    }

    #[test]
    fn states_serialize_as_screaming_strings() {
        let json = serde_json::to_value(TaskState::Resolving).unwrap();
        assert_eq!(json, "RESOLVING");
    }

    #[test]
    fn json_round_trip() {
        let mut task = valid_task();
        task.state = TaskState::Completed;
        task.failed = true;
        task.failure_reason = "out of memory".to_string();
        task.first_completed_at = 2_000;

        let json = serde_json::to_string(&task).unwrap();
        let decoded = Task::from_json(&json).unwrap();
        assert_eq!(decoded, task);
    }
}
