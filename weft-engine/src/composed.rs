//! Composed-resource reconciliation.
//!
//! Diffs desired composed resources against observed ones: creates or
//! patches what should exist, deletes what no longer does (honoring the
//! per-resource delete policy), evaluates readiness and harvests connection
//! details declared by the composition's mapping.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use weft_api::meta::{ANNOTATION_DELETE_POLICY, DELETE_POLICY_ORPHAN};
use weft_api::{Composite, CompositionRevision, DynamicObject, TypedRef};
use weft_store::{apply, ObjectStore};

use crate::connection::read_composed_connection;
use crate::error::EngineError;
use crate::materialize::ComposedIntent;
use crate::readiness::is_ready;

/// What one composed-resource pass produced.
#[derive(Debug, Clone, Default)]
pub struct ComposedOutcome {
    /// References to every composed resource that now exists.
    pub refs: Vec<TypedRef>,
    /// Whether every composed resource is ready.
    pub ready: bool,
    /// Resource names that are not ready yet.
    pub unready: Vec<String>,
    /// Connection details harvested via the composition's name mapping.
    pub connection_details: BTreeMap<String, Vec<u8>>,
}

pub struct ComposedReconciler {
    store: Arc<dyn ObjectStore>,
}

impl ComposedReconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        xr: &Composite,
        revision: &CompositionRevision,
        intents: &[ComposedIntent],
        observed: &BTreeMap<String, DynamicObject>,
    ) -> Result<ComposedOutcome, EngineError> {
        let mut outcome = ComposedOutcome {
            ready: true,
            ..ComposedOutcome::default()
        };
        let composition = &revision.spec.composition;
        let desired_names: HashSet<&str> =
            intents.iter().map(|i| i.resource_name.as_str()).collect();

        for intent in intents {
            let mut object = intent.object.clone();

            // A previously created generateName object keeps its assigned
            // name; the observed slot remembers it.
            if object.metadata.name.is_none() {
                if let Some(existing) = observed.get(&intent.resource_name) {
                    object.metadata.name = existing.metadata.name.clone();
                    object.metadata.generate_name = None;
                }
            }

            if let Some(key) = object.key() {
                match self.store.get(&key).await {
                    Ok(existing) => {
                        if !existing.is_controlled_by(xr.uid()) {
                            return Err(EngineError::AlreadyOwned {
                                key,
                                controller_uid: existing
                                    .controller_ref()
                                    .map(|r| r.uid.clone())
                                    .unwrap_or_default(),
                            });
                        }
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
            }

            let applied = apply(self.store.as_ref(), &object).await?;
            tracing::debug!(
                composite = %xr.name(),
                resource = %intent.resource_name,
                object = %applied.name(),
                "Applied composed resource"
            );

            let checks = composition
                .readiness_checks
                .get(&intent.resource_name)
                .map(Vec::as_slice);
            if !is_ready(&applied, intent.ready, checks) {
                outcome.ready = false;
                outcome.unready.push(intent.resource_name.clone());
            }

            let harvested = read_composed_connection(self.store.as_ref(), &applied).await?;
            for mapping in &composition.connection_details {
                if mapping.from_resource != intent.resource_name {
                    continue;
                }
                if let Some(value) = harvested.get(&mapping.from_connection_secret_key) {
                    outcome
                        .connection_details
                        .insert(mapping.name.clone(), value.clone());
                }
            }

            outcome.refs.push(applied.typed_ref());
        }

        // Observed slots with no desired counterpart are deleted, unless the
        // object opted out via its delete policy.
        for (name, object) in observed {
            if desired_names.contains(name.as_str()) {
                continue;
            }
            if object.metadata.annotations.get(ANNOTATION_DELETE_POLICY).map(String::as_str)
                == Some(DELETE_POLICY_ORPHAN)
            {
                tracing::info!(
                    composite = %xr.name(),
                    resource = %name,
                    "Orphaning composed resource on request"
                );
                continue;
            }
            let Some(key) = object.key() else { continue };
            match self.store.delete(&key).await {
                Ok(()) => {
                    tracing::info!(
                        composite = %xr.name(),
                        resource = %name,
                        object = %key,
                        "Deleted composed resource absent from desired state"
                    );
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        if intents.is_empty() {
            outcome.ready = false;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_api::{
        CompositionRevisionSpec, CompositionSpec, ConnectionDetailMapping, ObjectMeta,
        OwnerReference, Secret, TypeRef,
    };
    use weft_store::InMemoryStore;

    fn xr(store_uid: &str) -> Composite {
        let mut obj = DynamicObject::new("example.org/v1", "XDatabase").named("db-1");
        obj.metadata.uid = Some(store_uid.to_string());
        Composite::new(obj)
    }

    fn revision(spec: CompositionSpec) -> CompositionRevision {
        CompositionRevision {
            api_version: "apiextensions.crossplane.io/v1".to_string(),
            kind: "CompositionRevision".to_string(),
            metadata: ObjectMeta {
                name: Some("db-rev-1".to_string()),
                ..ObjectMeta::default()
            },
            spec: CompositionRevisionSpec {
                revision: 1,
                composition: spec,
            },
        }
    }

    fn bucket_intent(xr: &Composite, name: &str) -> ComposedIntent {
        let mut object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "s3.example/v1",
            "kind": "Bucket",
            "metadata": { "name": name },
            "spec": { "region": "us-east-1" }
        }))
        .unwrap();
        object
            .set_controller_ref(OwnerReference::controller(&xr.0))
            .unwrap();
        ComposedIntent {
            resource_name: "bucket".to_string(),
            object,
            ready: None,
        }
    }

    #[tokio::test]
    async fn creates_missing_composed_resources() {
        let store = Arc::new(InMemoryStore::new());
        let xr = Composite::new(
            store
                .create(&DynamicObject::new("example.org/v1", "XDatabase").named("db-1"))
                .await
                .unwrap(),
        );
        let reconciler = ComposedReconciler::new(store.clone());
        let revision = revision(CompositionSpec::default());
        let intents = vec![bucket_intent(&xr, "db-1-bucket")];

        let outcome = reconciler
            .reconcile(&xr, &revision, &intents, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.refs.len(), 1);
        assert!(!outcome.ready, "no Ready condition yet");

        let key = weft_api::ObjectKey::cluster(
            TypeRef::new("s3.example/v1", "Bucket"),
            "db-1-bucket",
        );
        let stored = store.get(&key).await.unwrap();
        assert!(stored.is_controlled_by(xr.uid()));
    }

    #[tokio::test]
    async fn foreign_controller_is_terminal() {
        let store = Arc::new(InMemoryStore::new());
        let xr = Composite::new(
            store
                .create(&DynamicObject::new("example.org/v1", "XDatabase").named("db-1"))
                .await
                .unwrap(),
        );

        // Same slot, different controller.
        let other = store
            .create(&DynamicObject::new("example.org/v1", "XDatabase").named("db-2"))
            .await
            .unwrap();
        let mut occupied: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "s3.example/v1",
            "kind": "Bucket",
            "metadata": { "name": "db-1-bucket" }
        }))
        .unwrap();
        occupied
            .set_controller_ref(OwnerReference::controller(&other))
            .unwrap();
        store.create(&occupied).await.unwrap();

        let reconciler = ComposedReconciler::new(store);
        let revision = revision(CompositionSpec::default());
        let intents = vec![bucket_intent(&xr, "db-1-bucket")];

        let err = reconciler
            .reconcile(&xr, &revision, &intents, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyOwned { .. }));
    }

    #[tokio::test]
    async fn orphans_absent_from_desired_are_deleted() {
        let store = Arc::new(InMemoryStore::new());
        let xr = Composite::new(
            store
                .create(&DynamicObject::new("example.org/v1", "XDatabase").named("db-1"))
                .await
                .unwrap(),
        );
        let mut old = DynamicObject::new("s3.example/v1", "Bucket").named("old-bucket");
        old.set_controller_ref(OwnerReference::controller(&xr.0)).unwrap();
        let old = store.create(&old).await.unwrap();

        let mut observed = BTreeMap::new();
        observed.insert("old".to_string(), old.clone());

        let reconciler = ComposedReconciler::new(store.clone());
        let revision = revision(CompositionSpec::default());
        reconciler
            .reconcile(&xr, &revision, &[], &observed)
            .await
            .unwrap();

        assert!(store
            .get(&old.key().unwrap())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn orphan_policy_retains_the_object() {
        let store = Arc::new(InMemoryStore::new());
        let xr = Composite::new(
            store
                .create(&DynamicObject::new("example.org/v1", "XDatabase").named("db-1"))
                .await
                .unwrap(),
        );
        let mut old = DynamicObject::new("s3.example/v1", "Bucket").named("keep-me");
        old.set_annotation(ANNOTATION_DELETE_POLICY, DELETE_POLICY_ORPHAN);
        let old = store.create(&old).await.unwrap();

        let mut observed = BTreeMap::new();
        observed.insert("old".to_string(), old.clone());

        let reconciler = ComposedReconciler::new(store.clone());
        let revision = revision(CompositionSpec::default());
        reconciler
            .reconcile(&xr, &revision, &[], &observed)
            .await
            .unwrap();

        assert!(store.get(&old.key().unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn connection_details_follow_the_composition_mapping() {
        let store = Arc::new(InMemoryStore::new());
        let xr = Composite::new(
            store
                .create(&DynamicObject::new("example.org/v1", "XDatabase").named("db-1"))
                .await
                .unwrap(),
        );

        let mut intent = bucket_intent(&xr, "db-1-bucket");
        intent.object.set_value_at(
            "spec.writeConnectionSecretToRef",
            json!({ "name": "bucket-conn", "namespace": "crossplane-system" }),
        );

        let reconciler = ComposedReconciler::new(store.clone());
        let revision = revision(CompositionSpec {
            connection_details: vec![ConnectionDetailMapping {
                name: "bucket-endpoint".to_string(),
                from_resource: "bucket".to_string(),
                from_connection_secret_key: "endpoint".to_string(),
            }],
            ..CompositionSpec::default()
        });

        // First pass creates the bucket; its controller writes the secret.
        let outcome = reconciler
            .reconcile(&xr, &revision, &[intent.clone()], &BTreeMap::new())
            .await
            .unwrap();
        assert!(outcome.connection_details.is_empty());

        let bucket_key = weft_api::ObjectKey::cluster(
            TypeRef::new("s3.example/v1", "Bucket"),
            "db-1-bucket",
        );
        let bucket = store.get(&bucket_key).await.unwrap();
        let mut secret = weft_api::to_dynamic(&{
            let mut s = Secret::new("bucket-conn", "crossplane-system");
            s.insert("endpoint", "s3.example/db-1");
            s
        });
        secret
            .set_controller_ref(OwnerReference::controller(&bucket))
            .unwrap();
        store.create(&secret).await.unwrap();

        let outcome = reconciler
            .reconcile(&xr, &revision, &[intent], &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.connection_details.get("bucket-endpoint").map(Vec::as_slice),
            Some(b"s3.example/db-1".as_ref())
        );
    }
}
