use thiserror::Error;

use crate::task::TaskState;

/// Validation and lifecycle errors for keel models.
///
/// Validation and lifecycle errors are returned to callers verbatim; store
/// errors live in `keel-core` and are translated at the store boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A field failed validation.
    #[error("invalid field: {field}")]
    InvalidField {
        /// Wire name of the offending field.
        field: &'static str,
    },

    /// An immutable field was changed by an update.
    #[error("attempt to make invalid change to field: {field}")]
    InvalidModification {
        /// Wire name of the offending field.
        field: &'static str,
    },

    /// A payload could not be decoded.
    #[error("invalid json: {reason}")]
    InvalidJson {
        /// Decoder failure description.
        reason: String,
    },

    /// Claim rejected by the actual-LRP transition rules.
    #[error("cannot claim actual lrp")]
    ActualLrpCannotBeClaimed,

    /// Start rejected by the actual-LRP transition rules.
    #[error("cannot start actual lrp")]
    ActualLrpCannotBeStarted,

    /// Crash rejected: the record is not in a crashable state.
    #[error("cannot crash actual lrp")]
    ActualLrpCannotBeCrashed,

    /// Fail rejected: only unclaimed records accept a placement error.
    #[error("cannot fail actual lrp")]
    ActualLrpCannotBeFailed,

    /// Unclaim rejected by the transition rules.
    #[error("cannot unclaim actual lrp")]
    ActualLrpCannotBeUnclaimed,

    /// Evacuation rejected: the evacuating record belongs to another caller.
    #[error("cannot evacuate actual lrp")]
    ActualLrpCannotBeEvacuated,

    /// Removal rejected: the record does not match the presented keys.
    #[error("cannot remove actual lrp")]
    ActualLrpCannotBeRemoved,

    /// A task transition outside the allowed state machine.
    #[error("invalid task state transition from {from} to {to}")]
    TaskStateTransition {
        /// State the task is currently in.
        from: TaskState,
        /// State the caller asked for.
        to: TaskState,
    },

    /// Resolution attempted on a task that is not completed.
    #[error("cannot resolve task in state {from}")]
    TaskCannotBeResolved {
        /// State the task is currently in.
        from: TaskState,
    },

    /// A task operation arrived from a cell other than the one running it.
    #[error("task is running on a different cell")]
    TaskRunningOnDifferentCell,

    /// A cell id had no presence entry.
    #[error("cell not found: {cell_id}")]
    CellNotFound {
        /// Cell that is missing from the registry.
        cell_id: String,
    },

    /// A required service presence (auctioneer, receptor, ...) is absent.
    #[error("service unavailable: {service}")]
    ServiceUnavailable {
        /// Name of the absent service.
        service: &'static str,
    },
}

impl ModelError {
    /// Shorthand for [`ModelError::InvalidField`].
    pub fn invalid_field(field: &'static str) -> Self {
        Self::InvalidField { field }
    }

    /// Shorthand for [`ModelError::InvalidModification`].
    pub fn invalid_modification(field: &'static str) -> Self {
        Self::InvalidModification { field }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_display() {
        assert_eq!(ModelError::invalid_field("cpu_weight").to_string(), "invalid field: cpu_weight");
    }

    #[test]
    fn task_transition_display() {
        let err = ModelError::TaskStateTransition {
            from: TaskState::Pending,
            to: TaskState::Completed,
        };
        assert_eq!(err.to_string(), "invalid task state transition from PENDING to COMPLETED");
    }

    #[test]
    fn json_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(ModelError::from(err), ModelError::InvalidJson { .. }));
    }
}
