//! Typed status conditions.
//!
//! Conditions follow the usual control-plane shape: a type, a ternary status,
//! a machine reason and an optional human message. The engine cares about two
//! well-known types, `Ready` and `Synced`; everything else is carried opaquely
//! (functions may project arbitrary condition types onto the composite).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TYPE_READY: &str = "Ready";
pub const TYPE_SYNCED: &str = "Synced";

pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_UNAVAILABLE: &str = "Unavailable";
pub const REASON_CREATING: &str = "Creating";
pub const REASON_DELETING: &str = "Deleting";
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Default for ConditionStatus {
    fn default() -> Self {
        ConditionStatus::Unknown
    }
}

/// One typed condition on an object's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus, reason: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: None,
            last_transition_time: Some(Utc::now()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The composite's composed resources are all available.
    pub fn ready() -> Self {
        Self::new(TYPE_READY, ConditionStatus::True, REASON_AVAILABLE)
    }

    pub fn unready(reason: impl Into<String>) -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, reason)
    }

    pub fn creating() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, REASON_CREATING)
    }

    pub fn deleting() -> Self {
        Self::new(TYPE_READY, ConditionStatus::False, REASON_DELETING)
    }

    /// The last reconcile completed without error.
    pub fn synced() -> Self {
        Self::new(TYPE_SYNCED, ConditionStatus::True, REASON_RECONCILE_SUCCESS)
    }

    pub fn not_synced(message: impl Into<String>) -> Self {
        Self::new(TYPE_SYNCED, ConditionStatus::False, REASON_RECONCILE_ERROR)
            .with_message(message)
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Upsert `condition` into `conditions`, keyed by type.
///
/// The transition timestamp is preserved when the status does not change, so
/// repeated reconciles do not churn `lastTransitionTime`.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Find a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_replaces_by_type() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::creating());
        set_condition(&mut conditions, Condition::ready());
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].is_true());
        assert_eq!(conditions[0].reason, REASON_AVAILABLE);
    }

    #[test]
    fn set_condition_preserves_transition_time_on_same_status() {
        let mut conditions = Vec::new();
        let first = Condition::ready();
        let stamp = first.last_transition_time;
        set_condition(&mut conditions, first);
        set_condition(&mut conditions, Condition::ready().with_message("still fine"));
        assert_eq!(conditions[0].last_transition_time, stamp);
        assert_eq!(conditions[0].message.as_deref(), Some("still fine"));
    }

    #[test]
    fn distinct_types_coexist() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::synced());
        set_condition(&mut conditions, Condition::unready(REASON_UNAVAILABLE));
        assert_eq!(conditions.len(), 2);
        assert!(get_condition(&conditions, TYPE_SYNCED).unwrap().is_true());
        assert!(!get_condition(&conditions, TYPE_READY).unwrap().is_true());
    }

    #[test]
    fn serializes_with_control_plane_field_names() {
        let condition = Condition::ready();
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], "Ready");
        assert_eq!(value["status"], "True");
        assert!(value.get("lastTransitionTime").is_some());
    }
}
