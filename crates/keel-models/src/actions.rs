//! Recursive action trees describing how a workload runs.
//!
//! Wire format is `{"action": "<kind>", "args": {...}}`, nesting freely:
//! composites (`serial`, `parallel`, `codependent`) hold child actions,
//! wrappers (`timeout`, `try`, `emit_progress`) hold exactly one.

use serde::Deserialize;
use serde::Serialize;

use crate::error::ModelError;

/// One step of a workload's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum Action {
    /// Fetch an artifact into the container.
    Download {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        cache_key: String,
    },
    /// Execute a process.
    Run {
        path: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: Vec<EnvironmentVariable>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_limits: Option<ResourceLimits>,
    },
    /// Ship an artifact out of the container.
    Upload { from: String, to: String },
    /// Run children in order, stopping at the first failure.
    Serial { actions: Vec<Action> },
    /// Run children concurrently, failing if any child fails.
    Parallel { actions: Vec<Action> },
    /// Run children concurrently until any one of them exits.
    Codependent { actions: Vec<Action> },
    /// Fail the child if it has not finished within the deadline.
    Timeout { action: Box<Action>, timeout_ms: u64 },
    /// Run the child and swallow its failure.
    Try { action: Box<Action> },
    /// Wrap the child with user-visible progress messages.
    EmitProgress {
        action: Box<Action>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        start_message: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        success_message: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        failure_message: String,
    },
}

/// A name/value pair in a process environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

/// Kernel resource limits applied to a run action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nofile: Option<u64>,
}

impl Action {
    /// Validate the tree: leaves need their sources, composites must not be
    /// empty, wrappers recurse.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Action::Download { from, to, .. } => {
                if from.is_empty() {
                    return Err(ModelError::invalid_field("from"));
                }
                if to.is_empty() {
                    return Err(ModelError::invalid_field("to"));
                }
                Ok(())
            }
            Action::Run { path, .. } => {
                if path.is_empty() {
                    return Err(ModelError::invalid_field("path"));
                }
                Ok(())
            }
            Action::Upload { from, to } => {
                if from.is_empty() {
                    return Err(ModelError::invalid_field("from"));
                }
                if to.is_empty() {
                    return Err(ModelError::invalid_field("to"));
                }
                Ok(())
            }
            Action::Serial { actions } | Action::Parallel { actions } | Action::Codependent { actions } => {
                if actions.is_empty() {
                    return Err(ModelError::invalid_field("actions"));
                }
                for action in actions {
                    action.validate()?;
                }
                Ok(())
            }
            Action::Timeout { action, timeout_ms } => {
                if *timeout_ms == 0 {
                    return Err(ModelError::invalid_field("timeout_ms"));
                }
                action.validate()
            }
            Action::Try { action } => action.validate(),
            Action::EmitProgress { action, .. } => action.validate(),
        }
    }
}
