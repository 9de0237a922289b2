//! Error type for workload-store operations.

use keel_coordination::CoordinationError;
use keel_core::StoreError;
use keel_models::ModelError;
use snafu::Snafu;

/// Result type for workload operations.
pub type Result<T, E = BbsError> = std::result::Result<T, E>;

/// Errors surfaced by the workload stores.
///
/// Validation and lifecycle failures pass through verbatim in `Model`;
/// storage failures arrive already translated to the canonical kinds in
/// `Store`. Auction, cell and callback delivery failures never appear here:
/// they are logged inside the mutating operations and convergence retries
/// the work.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BbsError {
    /// A model-level validation or lifecycle error.
    #[snafu(display("{source}"), context(false))]
    Model {
        /// Source error, returned to the caller verbatim.
        source: ModelError,
    },

    /// A store-level error.
    #[snafu(display("{source}"), context(false))]
    Store {
        /// Source error in canonical form.
        source: StoreError,
    },
}

impl BbsError {
    /// The model error, if this is one.
    pub fn as_model(&self) -> Option<&ModelError> {
        match self {
            BbsError::Model { source } => Some(source),
            BbsError::Store { .. } => None,
        }
    }

    /// The store error, if this is one.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            BbsError::Store { source } => Some(source),
            BbsError::Model { .. } => None,
        }
    }

    /// True when the operation failed because a record was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BbsError::Store {
            source: StoreError::ResourceNotFound { .. }
        })
    }

    /// True when a CAS pre-image did not hold.
    pub fn is_comparison_failed(&self) -> bool {
        matches!(self, BbsError::Store {
            source: StoreError::ComparisonFailed { .. }
        })
    }
}

impl From<CoordinationError> for BbsError {
    fn from(err: CoordinationError) -> Self {
        BbsError::Model {
            source: ModelError::from(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_errors_pass_through_verbatim() {
        let err: BbsError = ModelError::invalid_field("cpu_weight").into();
        assert_eq!(err.to_string(), "invalid field: cpu_weight");
        assert_eq!(err.as_model(), Some(&ModelError::invalid_field("cpu_weight")));
    }

    #[test]
    fn store_errors_keep_their_kind() {
        let err: BbsError = StoreError::comparison_failed("/v1/task/t").into();
        assert!(err.is_comparison_failed());
        assert!(!err.is_not_found());
    }

    #[test]
    fn coordination_lookups_map_to_model_errors() {
        let err: BbsError = CoordinationError::CellNotFound {
            cell_id: "cell-1".to_string(),
        }
        .into();
        assert_eq!(err.as_model(), Some(&ModelError::CellNotFound {
            cell_id: "cell-1".to_string()
        }));
    }
}
