//! Observed state of a single LRP instance.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ModelError;
use crate::guid::is_valid_guid;
use crate::modification_tag::ModificationTag;

/// Stable identity of an instance slot, unchanged across transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ActualLRPKey {
    pub process_guid: String,
    pub index: i32,
    pub domain: String,
}

impl ActualLRPKey {
    pub fn new(process_guid: impl Into<String>, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            domain: domain.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !is_valid_guid(&self.process_guid) {
            return Err(ModelError::invalid_field("process_guid"));
        }
        if self.domain.is_empty() {
            return Err(ModelError::invalid_field("domain"));
        }
        if self.index < 0 {
            return Err(ModelError::invalid_field("index"));
        }
        Ok(())
    }
}

/// Placement identity, replaced on every claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ActualLRPInstanceKey {
    pub instance_guid: String,
    pub cell_id: String,
}

impl ActualLRPInstanceKey {
    pub fn new(instance_guid: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            instance_guid: instance_guid.into(),
            cell_id: cell_id.into(),
        }
    }

    /// True when both parts are unset, the shape an unclaimed record carries.
    pub fn is_empty(&self) -> bool {
        self.instance_guid.is_empty() && self.cell_id.is_empty()
    }

    /// Either fully set or fully empty; half-set keys are invalid.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.instance_guid.is_empty() && !self.cell_id.is_empty() {
            return Err(ModelError::invalid_field("instance_guid"));
        }
        if !self.instance_guid.is_empty() && self.cell_id.is_empty() {
            return Err(ModelError::invalid_field("cell_id"));
        }
        Ok(())
    }
}

/// Network location of a running instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActualLRPNetInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
}

impl ActualLRPNetInfo {
    pub fn new(host: impl Into<String>, ports: Vec<PortMapping>) -> Self {
        Self {
            host: host.into(),
            ports,
        }
    }
}

/// Mapping from a container port to the host port it is bound on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub host_port: u16,
}

fn is_zero_port(port: &u16) -> bool {
    *port == 0
}

/// Lifecycle state of an instance slot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActualLRPState {
    #[default]
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

impl fmt::Display for ActualLRPState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActualLRPState::Unclaimed => "UNCLAIMED",
            ActualLRPState::Claimed => "CLAIMED",
            ActualLRPState::Running => "RUNNING",
            ActualLRPState::Crashed => "CRASHED",
        };
        f.write_str(name)
    }
}

/// One instance record, stored at `/v1/actual/<pg>/<idx>/instance` (or the
/// `evacuating` leaf during a drain).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActualLRP {
    #[serde(flatten)]
    pub key: ActualLRPKey,
    #[serde(flatten)]
    pub instance_key: ActualLRPInstanceKey,
    #[serde(flatten)]
    pub net_info: ActualLRPNetInfo,
    #[serde(default)]
    pub crash_count: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub crash_reason: String,
    pub state: ActualLRPState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub placement_error: String,
    pub since: i64,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl ActualLRP {
    /// A fresh unclaimed record for an instance slot.
    pub fn new_unclaimed(key: ActualLRPKey, since: i64) -> Self {
        Self {
            key,
            since,
            state: ActualLRPState::Unclaimed,
            modification_tag: ModificationTag::fresh(),
            ..Default::default()
        }
    }

    /// Decode and validate a stored payload.
    pub fn from_json(payload: &str) -> Result<Self, ModelError> {
        let lrp: ActualLRP = serde_json::from_str(payload)?;
        lrp.validate()?;
        Ok(lrp)
    }

    /// Enforce the per-state invariants on the instance key.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.key.validate()?;
        self.instance_key.validate()?;

        match self.state {
            ActualLRPState::Unclaimed | ActualLRPState::Crashed => {
                if !self.instance_key.is_empty() {
                    return Err(ModelError::invalid_field("instance_guid"));
                }
            }
            ActualLRPState::Claimed | ActualLRPState::Running => {
                if self.instance_key.is_empty() {
                    return Err(ModelError::invalid_field("instance_guid"));
                }
            }
        }
        Ok(())
    }

    /// The transition table for CAS updates of the `/instance` record.
    ///
    /// The key never changes; a transition presenting a different key is
    /// always rejected. Claimed and Running records only accept same-state
    /// or Running transitions from the holder of the current instance key,
    /// except that anyone may take a Claimed record to Running (the claim
    /// holder has moved the container to a new placement).
    pub fn allows_transition_to(
        &self,
        key: &ActualLRPKey,
        instance_key: &ActualLRPInstanceKey,
        new_state: ActualLRPState,
    ) -> bool {
        if self.key != *key {
            return false;
        }

        match (self.state, new_state) {
            (_, ActualLRPState::Unclaimed) => true,
            (ActualLRPState::Unclaimed, ActualLRPState::Claimed) => true,
            (ActualLRPState::Unclaimed, ActualLRPState::Running) => true,
            (ActualLRPState::Claimed, ActualLRPState::Claimed) => self.instance_key == *instance_key,
            (ActualLRPState::Claimed, ActualLRPState::Running) => true,
            (ActualLRPState::Running, ActualLRPState::Claimed) => self.instance_key == *instance_key,
            (ActualLRPState::Running, ActualLRPState::Running) => self.instance_key == *instance_key,
            (ActualLRPState::Crashed, _) => false,
            (_, ActualLRPState::Crashed) => false,
        }
    }
}

/// The coexisting records for one instance slot during a drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualLRPGroup {
    /// The authoritative `/instance` record.
    pub instance: Option<ActualLRP>,
    /// The transient `/evacuating` record, present only during a drain.
    pub evacuating: Option<ActualLRP>,
}

impl ActualLRPGroup {
    /// The record a consumer should route to: the instance record if it is
    /// running, otherwise a running evacuating record, otherwise whichever
    /// exists.
    pub fn resolve(&self) -> Option<&ActualLRP> {
        match (&self.instance, &self.evacuating) {
            (Some(instance), _) if instance.state == ActualLRPState::Running => Some(instance),
            (_, Some(evacuating)) if evacuating.state == ActualLRPState::Running => Some(evacuating),
            (Some(instance), _) => Some(instance),
            (None, evacuating) => evacuating.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lrp_in(state: ActualLRPState) -> ActualLRP {
        let instance_key = match state {
            ActualLRPState::Unclaimed | ActualLRPState::Crashed => ActualLRPInstanceKey::default(),
            _ => ActualLRPInstanceKey::new("instance-guid", "cell-id"),
        };
        ActualLRP {
            key: ActualLRPKey::new("some-guid", 2, "some-domain"),
            instance_key,
            state,
            since: 1138,
            ..Default::default()
        }
    }

    #[test]
    fn key_validation() {
        assert!(ActualLRPKey::new("process-guid", 1, "domain").validate().is_ok());
        assert_eq!(
            ActualLRPKey::new("", 1, "domain").validate().unwrap_err(),
            ModelError::invalid_field("process_guid")
        );
        assert_eq!(
            ActualLRPKey::new("process-guid", 1, "").validate().unwrap_err(),
            ModelError::invalid_field("domain")
        );
        assert_eq!(
            ActualLRPKey::new("process-guid", -1, "domain").validate().unwrap_err(),
            ModelError::invalid_field("index")
        );
    }

    #[test]
    fn instance_key_must_be_all_or_nothing() {
        assert!(ActualLRPInstanceKey::new("instance-guid", "cell-id").validate().is_ok());
        assert!(ActualLRPInstanceKey::default().validate().is_ok());
        assert_eq!(
            ActualLRPInstanceKey::new("instance-guid", "").validate().unwrap_err(),
            ModelError::invalid_field("cell_id")
        );
        assert_eq!(
            ActualLRPInstanceKey::new("", "cell-id").validate().unwrap_err(),
            ModelError::invalid_field("instance_guid")
        );
    }

    #[test]
    fn unclaimed_must_carry_no_instance_key() {
        let mut lrp = lrp_in(ActualLRPState::Unclaimed);
        assert!(lrp.validate().is_ok());

        lrp.instance_key = ActualLRPInstanceKey::new("instance-guid", "cell-id");
        assert!(lrp.validate().is_err());
    }

    #[test]
    fn claimed_and_running_require_instance_key() {
        for state in [ActualLRPState::Claimed, ActualLRPState::Running] {
            let mut lrp = lrp_in(state);
            assert!(lrp.validate().is_ok());

            lrp.instance_key = ActualLRPInstanceKey::default();
            assert!(lrp.validate().is_err(), "{state} without instance key should be invalid");
        }
    }

    #[test]
    fn transitions_reject_a_different_key() {
        let lrp = lrp_in(ActualLRPState::Running);
        let other_key = ActualLRPKey::new("other-guid", 2, "some-domain");
        assert!(!lrp.allows_transition_to(&other_key, &lrp.instance_key, ActualLRPState::Unclaimed));
    }

    #[test]
    fn transition_table() {
        let same = ActualLRPInstanceKey::new("instance-guid", "cell-id");
        let other = ActualLRPInstanceKey::new("other-instance", "other-cell");

        struct Case {
            from: ActualLRPState,
            with: ActualLRPInstanceKey,
            to: ActualLRPState,
            allowed: bool,
        }
        let cases = [
            Case { from: ActualLRPState::Unclaimed, with: same.clone(), to: ActualLRPState::Unclaimed, allowed: true },
            Case { from: ActualLRPState::Unclaimed, with: same.clone(), to: ActualLRPState::Claimed, allowed: true },
            Case { from: ActualLRPState::Unclaimed, with: other.clone(), to: ActualLRPState::Running, allowed: true },
            Case { from: ActualLRPState::Claimed, with: same.clone(), to: ActualLRPState::Unclaimed, allowed: true },
            Case { from: ActualLRPState::Claimed, with: same.clone(), to: ActualLRPState::Claimed, allowed: true },
            Case { from: ActualLRPState::Claimed, with: other.clone(), to: ActualLRPState::Claimed, allowed: false },
            Case { from: ActualLRPState::Claimed, with: other.clone(), to: ActualLRPState::Running, allowed: true },
            Case { from: ActualLRPState::Running, with: same.clone(), to: ActualLRPState::Unclaimed, allowed: true },
            Case { from: ActualLRPState::Running, with: same.clone(), to: ActualLRPState::Claimed, allowed: true },
            Case { from: ActualLRPState::Running, with: other.clone(), to: ActualLRPState::Claimed, allowed: false },
            Case { from: ActualLRPState::Running, with: same.clone(), to: ActualLRPState::Running, allowed: true },
            Case { from: ActualLRPState::Running, with: other.clone(), to: ActualLRPState::Running, allowed: false },
            Case { from: ActualLRPState::Crashed, with: same.clone(), to: ActualLRPState::Unclaimed, allowed: true },
            Case { from: ActualLRPState::Crashed, with: same.clone(), to: ActualLRPState::Claimed, allowed: false },
        ];

        for case in cases {
            let lrp = lrp_in(case.from);
            assert_eq!(
                lrp.allows_transition_to(&lrp.key.clone(), &case.with, case.to),
                case.allowed,
                "{} -> {} with {:?}",
                case.from,
                case.to,
                case.with,
            );
        }
    }

    #[test]
    fn json_round_trip_is_flat() {
        let lrp = ActualLRP {
            key: ActualLRPKey::new("some-guid", 2, "some-domain"),
            instance_key: ActualLRPInstanceKey::new("some-instance-guid", "some-cell-id"),
            net_info: ActualLRPNetInfo::new("1.2.3.4", vec![
                PortMapping { container_port: 8080, host_port: 0 },
                PortMapping { container_port: 8081, host_port: 1234 },
            ]),
            state: ActualLRPState::Running,
            since: 1138,
            ..Default::default()
        };

        let json = serde_json::to_value(&lrp).unwrap();
        assert_eq!(json["process_guid"], "some-guid");
        assert_eq!(json["instance_guid"], "some-instance-guid");
        assert_eq!(json["host"], "1.2.3.4");
        assert_eq!(json["state"], "RUNNING");
        assert_eq!(json["ports"][1]["host_port"], 1234);

        let decoded = ActualLRP::from_json(&json.to_string()).unwrap();
        assert_eq!(decoded, lrp);
    }

    #[test]
    fn group_resolves_running_instance_first() {
        let running = lrp_in(ActualLRPState::Running);
        let mut evacuating = lrp_in(ActualLRPState::Running);
        evacuating.instance_key = ActualLRPInstanceKey::new("old-instance", "old-cell");

        let group = ActualLRPGroup {
            instance: Some(running.clone()),
            evacuating: Some(evacuating.clone()),
        };
        assert_eq!(group.resolve(), Some(&running));

        let draining = ActualLRPGroup {
            instance: Some(lrp_in(ActualLRPState::Unclaimed)),
            evacuating: Some(evacuating.clone()),
        };
        assert_eq!(draining.resolve(), Some(&evacuating));

        let empty = ActualLRPGroup::default();
        assert_eq!(empty.resolve(), None);
    }
}
