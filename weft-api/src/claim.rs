//! The claim (XRC): the namespaced facade over a composite.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::composite::SecretRef;
use crate::condition::Condition;
use crate::object::{DynamicObject, TypedRef};

/// How deleting a claim treats its bound composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeDeletePolicy {
    /// Delete the composite and wait for it to be gone before releasing the
    /// claim's finalizer.
    Foreground,
    /// Delete the composite and release the claim immediately.
    Background,
}

impl Default for CompositeDeletePolicy {
    fn default() -> Self {
        CompositeDeletePolicy::Background
    }
}

/// Typed view over a namespaced claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim(pub DynamicObject);

impl Claim {
    pub fn new(obj: DynamicObject) -> Self {
        Self(obj)
    }

    pub fn into_inner(self) -> DynamicObject {
        self.0
    }

    /// The composite this claim is bound to, if any.
    pub fn resource_ref(&self) -> Option<TypedRef> {
        self.0.get_at("spec.resourceRef")
    }

    pub fn set_resource_ref(&mut self, xr: &TypedRef) {
        self.0.set_value_at(
            "spec.resourceRef",
            serde_json::to_value(xr).expect("refs serialize to JSON"),
        );
    }

    pub fn composite_delete_policy(&self) -> CompositeDeletePolicy {
        self.0
            .get_at("spec.compositeDeletePolicy")
            .unwrap_or_default()
    }

    pub fn composition_ref(&self) -> Option<String> {
        self.0.get_at("spec.compositionRef.name")
    }

    pub fn set_composition_ref(&mut self, name: &str) {
        self.0.set_value_at("spec.compositionRef", json!({ "name": name }));
    }

    pub fn composition_selector(&self) -> Option<BTreeMap<String, String>> {
        self.0.get_at("spec.compositionSelector.matchLabels")
    }

    pub fn write_connection_secret_to(&self) -> Option<SecretRef> {
        self.0.get_at("spec.writeConnectionSecretToRef")
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
}

impl Deref for Claim {
    type Target = DynamicObject;

    fn deref(&self) -> &DynamicObject {
        &self.0
    }
}

impl DerefMut for Claim {
    fn deref_mut(&mut self) -> &mut DynamicObject {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim() -> Claim {
        Claim::new(
            DynamicObject::new("example.org/v1", "Database")
                .named("db")
                .in_namespace("default"),
        )
    }

    #[test]
    fn delete_policy_defaults_to_background() {
        assert_eq!(
            claim().composite_delete_policy(),
            CompositeDeletePolicy::Background
        );
    }

    #[test]
    fn delete_policy_parses_foreground() {
        let mut claim = claim();
        claim
            .0
            .set_value_at("spec.compositeDeletePolicy", json!("Foreground"));
        assert_eq!(
            claim.composite_delete_policy(),
            CompositeDeletePolicy::Foreground
        );
    }

    #[test]
    fn resource_ref_round_trips() {
        let mut claim = claim();
        assert_eq!(claim.resource_ref(), None);
        let xr = TypedRef {
            api_version: "example.org/v1".to_string(),
            kind: "XDatabase".to_string(),
            namespace: None,
            name: "db-x7k2p".to_string(),
            uid: None,
        };
        claim.set_resource_ref(&xr);
        assert_eq!(claim.resource_ref(), Some(xr));
    }
}
