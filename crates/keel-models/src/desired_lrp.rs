//! Declared intent for a replicated workload.

use serde::Deserialize;
use serde::Serialize;

use crate::actions::Action;
use crate::actions::EnvironmentVariable;
use crate::error::ModelError;
use crate::guid::is_valid_guid;
use crate::modification_tag::ModificationTag;

/// Longest annotation accepted on desired LRPs and tasks.
pub const MAXIMUM_ANNOTATION_LENGTH: usize = 10 * 1024;

/// Desired state of a long-running process.
///
/// Identity and placement-relevant fields are immutable after creation; only
/// `instances`, `routes` and `annotation` may change through
/// [`DesiredLRPUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredLRP {
    pub process_guid: String,
    pub domain: String,
    pub root_fs: String,
    pub stack: String,
    pub instances: i32,
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub cpu_weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<Action>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<Action>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_guid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub annotation: String,
    #[serde(default, rename = "env", skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

/// Mutable subset of a desired LRP.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredLRPUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl DesiredLRP {
    /// Decode and validate a stored payload.
    pub fn from_json(payload: &str) -> Result<Self, ModelError> {
        let lrp: DesiredLRP = serde_json::from_str(payload)?;
        lrp.validate()?;
        Ok(lrp)
    }

    /// Field-level validation, first failure wins.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.domain.is_empty() {
            return Err(ModelError::invalid_field("domain"));
        }
        if !is_valid_guid(&self.process_guid) {
            return Err(ModelError::invalid_field("process_guid"));
        }
        if self.root_fs.is_empty() {
            return Err(ModelError::invalid_field("root_fs"));
        }
        if self.stack.is_empty() {
            return Err(ModelError::invalid_field("stack"));
        }
        self.action.validate()?;
        if let Some(setup) = &self.setup {
            setup.validate()?;
        }
        if let Some(monitor) = &self.monitor {
            monitor.validate()?;
        }
        if self.instances < 0 {
            return Err(ModelError::invalid_field("instances"));
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

    /// Produce the record that results from applying `update`.
    pub fn apply_update(&self, update: &DesiredLRPUpdate) -> DesiredLRP {
        let mut updated = self.clone();
        if let Some(instances) = update.instances {
            updated.instances = instances;
        }
        if let Some(routes) = &update.routes {
            updated.routes = routes.clone();
        }
        if let Some(annotation) = &update.annotation {
            updated.annotation = annotation.clone();
        }
        updated
    }

    /// Reject any change to an immutable field between `self` and `updated`.
    pub fn validate_modifications(&self, updated: &DesiredLRP) -> Result<(), ModelError> {
        if self.process_guid != updated.process_guid {
            return Err(ModelError::invalid_modification("process_guid"));
        }
        if self.domain != updated.domain {
            return Err(ModelError::invalid_modification("domain"));
        }
        if self.root_fs != updated.root_fs {
            return Err(ModelError::invalid_modification("root_fs"));
        }
        if self.stack != updated.stack {
            return Err(ModelError::invalid_modification("stack"));
        }
        if self.environment_variables != updated.environment_variables {
            return Err(ModelError::invalid_modification("env"));
        }
        if self.setup != updated.setup {
            return Err(ModelError::invalid_modification("setup"));
        }
        if self.action != updated.action {
            return Err(ModelError::invalid_modification("action"));
        }
        if self.monitor != updated.monitor {
            return Err(ModelError::invalid_modification("monitor"));
        }
        if self.disk_mb != updated.disk_mb {
            return Err(ModelError::invalid_modification("disk_mb"));
        }
        if self.memory_mb != updated.memory_mb {
            return Err(ModelError::invalid_modification("memory_mb"));
        }
        if self.cpu_weight != updated.cpu_weight {
            return Err(ModelError::invalid_modification("cpu_weight"));
        }
        if self.ports != updated.ports {
            return Err(ModelError::invalid_modification("ports"));
        }
        if self.log_guid != updated.log_guid {
            return Err(ModelError::invalid_modification("log_guid"));
        }
        if self.log_source != updated.log_source {
            return Err(ModelError::invalid_modification("log_source"));
        }
        Ok(())
    }
}
