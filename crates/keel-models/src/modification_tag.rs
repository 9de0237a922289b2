use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Per-record monotonic counter used to detect concurrent writers.
///
/// The epoch identifies the record's creation; the index increases on every
/// committed mutation. Downstream consumers (route emitters, watchers)
/// compare tags to order observations of the same record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModificationTag {
    /// Opaque identifier assigned when the record is created.
    pub epoch: String,
    /// Count of committed mutations within the epoch.
    pub index: u32,
}

impl ModificationTag {
    /// Tag for a newly created record.
    pub fn fresh() -> Self {
        Self {
            epoch: Uuid::new_v4().to_string(),
            index: 0,
        }
    }

    /// Record one committed mutation.
    pub fn increment(&mut self) {
        self.index += 1;
    }

    /// True if `self` is a strictly later observation of the same record.
    pub fn succeeds(&self, other: &ModificationTag) -> bool {
        self.epoch == other.epoch && self.index > other.index
    }
}
