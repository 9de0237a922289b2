use thiserror::Error;

/// Canonical error kinds for key-value store operations.
///
/// Every backend translates its native failures into one of these kinds
/// before they cross the [`KeyValueStore`](crate::KeyValueStore) boundary, so
/// callers match on semantics rather than on backend-specific errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("store resource not found: {key}")]
    ResourceNotFound {
        /// Key that was not found.
        key: String,
    },

    /// A create was attempted for a key that already exists.
    #[error("store resource already exists: {key}")]
    ResourceExists {
        /// Key that already exists.
        key: String,
    },

    /// A compare-and-swap or compare-and-delete lost the race.
    #[error("store comparison failed for key {key}")]
    ComparisonFailed {
        /// Key whose precondition did not hold.
        key: String,
    },

    /// The operation did not complete within the backend's deadline.
    ///
    /// Mutations declared idempotent by the caller are retried indefinitely
    /// on this kind (see [`retry_on_timeout`](crate::retry_on_timeout)).
    #[error("store operation timed out after {duration_ms}ms")]
    Timeout {
        /// Duration in milliseconds before the timeout fired.
        duration_ms: u64,
    },

    /// The stored payload could not be interpreted by the backend.
    #[error("store value has invalid format for key {key}")]
    InvalidFormat {
        /// Key with the malformed value.
        key: String,
    },

    /// The requested TTL is not representable by the backend.
    #[error("store rejected ttl of {ttl_seconds}s")]
    InvalidTtl {
        /// TTL that was rejected.
        ttl_seconds: u64,
    },

    /// The store cannot currently serve requests.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Human-readable description of the outage.
        reason: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::ResourceNotFound`].
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::ResourceNotFound { key: key.into() }
    }

    /// Shorthand for [`StoreError::ResourceExists`].
    pub fn exists(key: impl Into<String>) -> Self {
        Self::ResourceExists { key: key.into() }
    }

    /// Shorthand for [`StoreError::ComparisonFailed`].
    pub fn comparison_failed(key: impl Into<String>) -> Self {
        Self::ComparisonFailed { key: key.into() }
    }

    /// True if this error indicates a transient condition worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}
