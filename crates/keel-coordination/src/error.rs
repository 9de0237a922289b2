//! Error types for the coordination layer.

use keel_core::StoreError;
use keel_models::ModelError;
use snafu::Snafu;

/// Result type for coordination operations.
pub type Result<T, E = CoordinationError> = std::result::Result<T, E>;

/// Errors that can occur in the presence, lock and services machinery.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordinationError {
    /// The session registry rejected or lost a session.
    #[snafu(display("session failed: {reason}"))]
    SessionFailed {
        /// Failure reason.
        reason: String,
    },

    /// A presence key is already bound to a live session.
    #[snafu(display("presence already held: {key} by {holder}"))]
    PresenceHeld {
        /// Contended key.
        key: String,
        /// Current holder's value payload.
        holder: String,
    },

    /// The registry read/write layer failed.
    #[snafu(display("registry error: {source}"))]
    Registry {
        /// Source error.
        source: StoreError,
    },

    /// A cell id had no presence entry.
    #[snafu(display("cell not found: {cell_id}"))]
    CellNotFound {
        /// Cell missing from the registry.
        cell_id: String,
    },

    /// A required service presence is absent.
    #[snafu(display("service unavailable: {service}"))]
    ServiceUnavailable {
        /// Name of the absent service.
        service: &'static str,
    },

    /// A presence payload could not be decoded.
    #[snafu(display("invalid presence payload at {key}: {reason}"))]
    InvalidPayload {
        /// Key with the malformed value.
        key: String,
        /// Decoder failure description.
        reason: String,
    },
}

impl From<StoreError> for CoordinationError {
    fn from(source: StoreError) -> Self {
        Self::Registry { source }
    }
}

impl From<CoordinationError> for ModelError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::CellNotFound { cell_id } => ModelError::CellNotFound { cell_id },
            CoordinationError::ServiceUnavailable { service } => ModelError::ServiceUnavailable { service },
            other => ModelError::InvalidJson {
                reason: other.to_string(),
            },
        }
    }
}
