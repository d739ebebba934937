//! The composite resource (XR): a typed view over a dynamic object.
//!
//! Composites are user-defined kinds, so the engine never has a static schema
//! for them. This wrapper exposes the handful of contractual fields the
//! engine reads and writes; everything else passes through untouched.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::condition::Condition;
use crate::object::{DynamicObject, TypedRef};

/// Reference to a connection secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Whether an unpinned composite follows new composition revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositionUpdatePolicy {
    /// Re-pin to the newest revision at the start of every reconcile.
    Automatic,
    /// Keep the current pin until a user moves it.
    Manual,
}

impl Default for CompositionUpdatePolicy {
    fn default() -> Self {
        CompositionUpdatePolicy::Automatic
    }
}

/// Typed view over a cluster-scoped composite resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite(pub DynamicObject);

impl Composite {
    pub fn new(obj: DynamicObject) -> Self {
        Self(obj)
    }

    pub fn into_inner(self) -> DynamicObject {
        self.0
    }

    /// Name of the composition selected by reference, if any.
    pub fn composition_ref(&self) -> Option<String> {
        self.0.get_at("spec.compositionRef.name")
    }

    pub fn set_composition_ref(&mut self, name: &str) {
        self.0.set_value_at("spec.compositionRef", json!({ "name": name }));
    }

    /// Label selector for choosing a composition, if any.
    pub fn composition_selector(&self) -> Option<BTreeMap<String, String>> {
        self.0.get_at("spec.compositionSelector.matchLabels")
    }

    /// Name of the pinned composition revision, if any.
    pub fn composition_revision_ref(&self) -> Option<String> {
        self.0.get_at("spec.compositionRevisionRef.name")
    }

    pub fn set_composition_revision_ref(&mut self, name: &str) {
        self.0
            .set_value_at("spec.compositionRevisionRef", json!({ "name": name }));
    }

    pub fn composition_update_policy(&self) -> CompositionUpdatePolicy {
        self.0
            .get_at("spec.compositionUpdatePolicy")
            .unwrap_or_default()
    }

    /// The claim this composite is bound to, if any.
    pub fn claim_ref(&self) -> Option<TypedRef> {
        self.0.get_at("spec.claimRef")
    }

    pub fn set_claim_ref(&mut self, claim: &TypedRef) {
        self.0.set_value_at(
            "spec.claimRef",
            serde_json::to_value(claim).expect("refs serialize to JSON"),
        );
    }

    pub fn write_connection_secret_to(&self) -> Option<SecretRef> {
        self.0.get_at("spec.writeConnectionSecretToRef")
    }

    pub fn set_write_connection_secret_to(&mut self, secret: &SecretRef) {
        self.0.set_value_at(
            "spec.writeConnectionSecretToRef",
            serde_json::to_value(secret).expect("refs serialize to JSON"),
        );
    }

    /// References to this composite's composed resources.
    pub fn resource_refs(&self) -> Vec<TypedRef> {
        self.0.get_at("spec.resourceRefs").unwrap_or_default()
    }

    pub fn set_resource_refs(&mut self, refs: &[TypedRef]) {
        self.0.set_value_at(
            "spec.resourceRefs",
            serde_json::to_value(refs).expect("refs serialize to JSON"),
        );
    }

    pub fn conditions(&self) -> Vec<Condition> {
        self.0.get_at("status.conditions").unwrap_or_default()
    }

    pub fn set_condition(&mut self, condition: Condition) {
        let mut conditions = self.conditions();
        crate::condition::set_condition(&mut conditions, condition);
        self.0.set_value_at(
            "status.conditions",
            serde_json::to_value(&conditions).expect("conditions serialize to JSON"),
        );
    }

    /// Condition types whitelisted for propagation onto the bound claim.
    pub fn claim_condition_types(&self) -> Vec<String> {
        self.0.get_at("status.claimConditionTypes").unwrap_or_default()
    }

    pub fn set_claim_condition_types(&mut self, types: &[String]) {
        self.0.set_value_at(
            "status.claimConditionTypes",
            serde_json::to_value(types).expect("strings serialize to JSON"),
        );
    }
}

impl Deref for Composite {
    type Target = DynamicObject;

    fn deref(&self) -> &DynamicObject {
        &self.0
    }
}

impl DerefMut for Composite {
    fn deref_mut(&mut self) -> &mut DynamicObject {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::TYPE_READY;

    fn xr() -> Composite {
        Composite::new(
            DynamicObject::new("example.org/v1", "XDatabase").named("db-1"),
        )
    }

    #[test]
    fn composition_revision_pin_round_trips() {
        let mut xr = xr();
        assert_eq!(xr.composition_revision_ref(), None);
        xr.set_composition_revision_ref("db-comp-abc123");
        assert_eq!(
            xr.composition_revision_ref().as_deref(),
            Some("db-comp-abc123")
        );
    }

    #[test]
    fn update_policy_defaults_to_automatic() {
        assert_eq!(
            xr().composition_update_policy(),
            CompositionUpdatePolicy::Automatic
        );
    }

    #[test]
    fn claim_ref_round_trips() {
        let mut xr = xr();
        let claim = TypedRef {
            api_version: "example.org/v1".to_string(),
            kind: "Database".to_string(),
            namespace: Some("default".to_string()),
            name: "db".to_string(),
            uid: Some("uid-claim".to_string()),
        };
        xr.set_claim_ref(&claim);
        assert_eq!(xr.claim_ref(), Some(claim));
    }

    #[test]
    fn conditions_merge_by_type() {
        let mut xr = xr();
        xr.set_condition(Condition::creating());
        xr.set_condition(Condition::ready());
        let conditions = xr.conditions();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, TYPE_READY);
        assert!(conditions[0].is_true());
    }
}
