//! Composition selection and immutable revisions.
//!
//! Every observed composition spec hash gets exactly one revision; composites
//! pin a revision name and reconcile against that snapshot, never against the
//! live composition.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use weft_api::meta::{ANNOTATION_SPEC_HASH, LABEL_COMPOSITION_NAME};
use weft_api::{
    to_dynamic, Composite, Composition, CompositionRevision, CompositionRevisionSpec, ObjectKey,
    OwnerReference,
};
use weft_store::{ObjectStore, StoreError};

use crate::error::EngineError;

/// Find-or-create revisions and resolve pins.
#[derive(Clone)]
pub struct RevisionManager {
    store: Arc<dyn ObjectStore>,
}

impl RevisionManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Resolve the composition a composite selects, by name or by label set.
    pub async fn select_composition(&self, xr: &Composite) -> Result<Composition, EngineError> {
        self.select(xr.composition_ref(), xr.composition_selector())
            .await
    }

    /// Resolve a composition from an explicit reference or a label selector,
    /// the way both composites and claims declare them.
    pub async fn select(
        &self,
        reference: Option<String>,
        selector: Option<std::collections::BTreeMap<String, String>>,
    ) -> Result<Composition, EngineError> {
        if let Some(name) = reference {
            let key = ObjectKey::cluster(Composition::type_ref(), name.clone());
            return match self.store.get(&key).await {
                Ok(obj) => obj
                    .try_into_typed(&Composition::type_ref())
                    .map_err(|e| EngineError::MalformedRevision {
                        name: name.clone(),
                        message: e.to_string(),
                    }),
                Err(err) if err.is_not_found() => {
                    Err(EngineError::MissingComposition { name })
                }
                Err(err) => Err(err.into()),
            };
        }

        if let Some(selector) = selector {
            let matches = self
                .store
                .list(&Composition::type_ref(), None, Some(&selector))
                .await?;
            // Deterministic pick: first by name.
            let mut candidates: Vec<_> = matches
                .into_iter()
                .filter_map(|obj| obj.try_into_typed(&Composition::type_ref()).ok())
                .collect::<Vec<Composition>>();
            candidates.sort_by(|a: &Composition, b: &Composition| {
                a.metadata.name.cmp(&b.metadata.name)
            });
            return candidates.into_iter().next().ok_or_else(|| {
                EngineError::MissingComposition {
                    name: format!("matching labels {selector:?}"),
                }
            });
        }

        Err(EngineError::MissingComposition {
            name: "<no composition reference or selector>".to_string(),
        })
    }

    /// The revision for the composition's current spec, creating it if this
    /// spec hash has never been observed.
    pub async fn latest_for(
        &self,
        composition: &Composition,
    ) -> Result<CompositionRevision, EngineError> {
        let hash = spec_hash(composition);
        let composition_name = composition.metadata.name.clone().unwrap_or_default();

        let mut selector = std::collections::BTreeMap::new();
        selector.insert(
            LABEL_COMPOSITION_NAME.to_string(),
            composition_name.clone(),
        );
        let existing = self
            .store
            .list(&CompositionRevision::type_ref(), None, Some(&selector))
            .await?;

        let mut revisions: Vec<CompositionRevision> = existing
            .iter()
            .filter_map(|obj| obj.try_into_typed(&CompositionRevision::type_ref()).ok())
            .collect();
        revisions.sort_by_key(|r| r.spec.revision);

        if let Some(found) = revisions.iter().find(|r| {
            r.metadata.annotations.get(ANNOTATION_SPEC_HASH) == Some(&hash)
        }) {
            return Ok(found.clone());
        }

        let next = revisions.last().map(|r| r.spec.revision + 1).unwrap_or(1);
        let name = format!("{composition_name}-{}", &hash[..7]);
        let mut revision = CompositionRevision {
            api_version: composition.api_version.clone(),
            kind: weft_api::composition::COMPOSITION_REVISION_KIND.to_string(),
            metadata: weft_api::ObjectMeta {
                name: Some(name.clone()),
                ..weft_api::ObjectMeta::default()
            },
            spec: CompositionRevisionSpec {
                revision: next,
                composition: composition.spec.clone(),
            },
        };
        revision
            .metadata
            .labels
            .insert(LABEL_COMPOSITION_NAME.to_string(), composition_name);
        revision
            .metadata
            .annotations
            .insert(ANNOTATION_SPEC_HASH.to_string(), hash);

        let mut dynamic = to_dynamic(&revision);
        dynamic
            .set_controller_ref(OwnerReference::controller(&to_dynamic(composition)))
            .ok();

        match self.store.create(&dynamic).await {
            Ok(created) => {
                tracing::info!(
                    revision = %name,
                    number = next,
                    "Created composition revision"
                );
                created
                    .try_into_typed(&CompositionRevision::type_ref())
                    .map_err(|e| EngineError::MalformedRevision {
                        name,
                        message: e.to_string(),
                    })
            }
            // Lost a race with a concurrent reconcile; the revision exists.
            Err(StoreError::AlreadyExists(key)) => {
                let obj = self.store.get(&key).await?;
                obj.try_into_typed(&CompositionRevision::type_ref())
                    .map_err(|e| EngineError::MalformedRevision {
                        name,
                        message: e.to_string(),
                    })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch a pinned revision by name.
    pub async fn get(&self, name: &str) -> Result<CompositionRevision, EngineError> {
        let key = ObjectKey::cluster(CompositionRevision::type_ref(), name.to_string());
        let obj = self.store.get(&key).await?;
        obj.try_into_typed(&CompositionRevision::type_ref())
            .map_err(|e| EngineError::MalformedRevision {
                name: name.to_string(),
                message: e.to_string(),
            })
    }
}

/// Controller over compositions: snapshots every observed spec into its
/// revision as soon as the composition changes, so composites pin promptly
/// instead of waiting for their next reconcile.
pub struct CompositionReconciler {
    store: Arc<dyn ObjectStore>,
    revisions: RevisionManager,
}

impl CompositionReconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            revisions: RevisionManager::new(store.clone()),
            store,
        }
    }
}

#[async_trait::async_trait]
impl weft_core::Reconciler for CompositionReconciler {
    type Key = ObjectKey;

    async fn reconcile(&self, key: &ObjectKey) -> Result<weft_core::Action, weft_core::BoxError> {
        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() => return Ok(weft_core::Action::await_change()),
            Err(err) => return Err(err.into()),
        };
        let composition: Composition = match obj.try_into_typed(&Composition::type_ref()) {
            Ok(composition) => composition,
            Err(err) => {
                tracing::warn!(composition = %obj.name(), error = %err, "Undecodable composition");
                return Ok(weft_core::Action::await_change());
            }
        };
        self.revisions.latest_for(&composition).await?;
        Ok(weft_core::Action::await_change())
    }
}

/// Stable hash of a composition's spec.
fn spec_hash(composition: &Composition) -> String {
    let canonical =
        serde_json::to_vec(&composition.spec).expect("composition specs serialize to JSON");
    let digest = Sha256::digest(&canonical);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_api::{CompositionSpec, DynamicObject, TypeRef};
    use weft_store::InMemoryStore;

    fn composition(name: &str) -> Composition {
        Composition::new(
            name,
            CompositionSpec {
                composite_type_ref: TypeRef::new("example.org/v1", "XDatabase"),
                ..CompositionSpec::default()
            },
        )
    }

    #[tokio::test]
    async fn same_spec_reuses_the_revision() {
        let store = Arc::new(InMemoryStore::new());
        let manager = RevisionManager::new(store.clone());
        let composition = composition("db");
        store.create(&to_dynamic(&composition)).await.unwrap();

        let first = manager.latest_for(&composition).await.unwrap();
        let second = manager.latest_for(&composition).await.unwrap();
        assert_eq!(first.metadata.name, second.metadata.name);
        assert_eq!(first.spec.revision, 1);
    }

    #[tokio::test]
    async fn changed_spec_mints_the_next_revision() {
        let store = Arc::new(InMemoryStore::new());
        let manager = RevisionManager::new(store.clone());
        let mut composition = composition("db");
        store.create(&to_dynamic(&composition)).await.unwrap();

        let first = manager.latest_for(&composition).await.unwrap();

        composition.spec.composite_type_ref = TypeRef::new("example.org/v2", "XDatabase");
        let second = manager.latest_for(&composition).await.unwrap();

        assert_ne!(first.metadata.name, second.metadata.name);
        assert_eq!(second.spec.revision, 2);
    }

    #[tokio::test]
    async fn composition_controller_mints_revisions_eagerly() {
        use weft_core::Reconciler as _;

        let store = Arc::new(InMemoryStore::new());
        let composition = composition("db");
        let created = store.create(&to_dynamic(&composition)).await.unwrap();

        let reconciler = CompositionReconciler::new(store.clone());
        reconciler.reconcile(&created.key().unwrap()).await.unwrap();

        let revisions = store
            .list(&CompositionRevision::type_ref(), None, None)
            .await
            .unwrap();
        assert_eq!(revisions.len(), 1);
    }

    #[tokio::test]
    async fn missing_composition_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        let manager = RevisionManager::new(store);
        let mut xr = Composite::new(DynamicObject::new("example.org/v1", "XDatabase").named("x"));
        xr.set_composition_ref("absent");
        let err = manager.select_composition(&xr).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingComposition { .. }));
    }
}
