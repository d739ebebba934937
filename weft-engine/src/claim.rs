//! The claim↔composite binder.
//!
//! Couples a namespaced claim to a cluster-scoped composite: synthesizes the
//! composite when absent, records the back-pointers (claim first, so a
//! failed second write cannot leak an unbound composite), and propagates
//! whitelisted conditions, connection details and the provider status view
//! back onto the claim.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use weft_api::condition::{TYPE_READY, TYPE_SYNCED};
use weft_api::meta::{FINALIZER_CLAIM, LABEL_CLAIM_NAME, LABEL_CLAIM_NAMESPACE};
use weft_api::{
    Claim, Composite, CompositeDeletePolicy, Condition, ConditionStatus, DynamicObject,
    ObjectKey, SecretRef,
};
use weft_core::{Action, BoxError, Reconciler};
use weft_store::{update_if_changed, EventRecorder, EventType, ObjectStore};

use crate::connection::{publish_secret, read_owned_secret};
use crate::error::EngineError;
use crate::revision::RevisionManager;

/// Synced=False reason when the two sides disagree about their binding.
pub const REASON_BIND_ERROR: &str = "BindError";

/// How long to wait while a foreground-deleted composite drains.
const FOREGROUND_WAIT: Duration = Duration::from_secs(5);
/// Poll interval while the bound composite is not ready yet.
const UNREADY_WAIT: Duration = Duration::from_secs(60);

/// Claim spec fields that never copy onto the composite.
const CLAIM_ONLY_FIELDS: &[&str] = &[
    "resourceRef",
    "compositeDeletePolicy",
    "writeConnectionSecretToRef",
];

pub struct ClaimReconciler {
    store: Arc<dyn ObjectStore>,
    revisions: RevisionManager,
    recorder: EventRecorder,
    /// Namespace where synthesized composites write their own connection
    /// secrets.
    namespace: String,
}

impl ClaimReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self {
            revisions: RevisionManager::new(store.clone()),
            recorder: EventRecorder::new(store.clone()),
            store,
            namespace: namespace.into(),
        }
    }

    async fn reconcile_claim(&self, key: &ObjectKey) -> Result<Action, EngineError> {
        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() => return Ok(Action::await_change()),
            Err(err) => return Err(err.into()),
        };
        let mut claim = Claim::new(obj);

        if claim.metadata.deletion_timestamp.is_some() {
            return self.finalize(&mut claim).await;
        }

        if !claim.metadata.finalizers.iter().any(|f| f == FINALIZER_CLAIM) {
            claim.metadata.finalizers.push(FINALIZER_CLAIM.to_string());
            claim.0 = self.store.update(&claim.0).await?;
        }

        let xr = match self.bind(&mut claim).await {
            Ok(xr) => xr,
            Err(EngineError::BindConflict { message }) => {
                claim.set_condition(
                    Condition::new(TYPE_SYNCED, ConditionStatus::False, REASON_BIND_ERROR)
                        .with_message(message.clone()),
                );
                self.recorder
                    .record(&claim.0, EventType::Warning, "BindComposite", &message)
                    .await;
                update_if_changed(self.store.as_ref(), &claim.0).await?;
                return Ok(Action::await_change());
            }
            Err(err) => return Err(err),
        };

        self.propagate(&mut claim, &xr).await?;
        update_if_changed(self.store.as_ref(), &claim.0).await?;

        let ready = claim
            .conditions()
            .iter()
            .any(|c| c.type_ == TYPE_READY && c.is_true());
        Ok(if ready {
            Action::await_change()
        } else {
            Action::requeue(UNREADY_WAIT)
        })
    }

    /// Ensure the claim is bound to a composite, creating or adopting one.
    async fn bind(&self, claim: &mut Claim) -> Result<Composite, EngineError> {
        match claim.resource_ref() {
            None => {
                let xr = self.synthesize(claim).await?;

                // Claim first: a dangling resourceRef heals on retry, a
                // dangling composite would leak.
                claim.set_resource_ref(&xr.typed_ref());
                claim.0 = self.store.update(&claim.0).await?;

                match self.store.create(&xr.0).await {
                    Ok(created) => {
                        tracing::info!(
                            claim = %claim.name(),
                            composite = %created.name(),
                            "Created composite for claim"
                        );
                        Ok(Composite::new(created))
                    }
                    Err(err) if matches!(err, weft_store::StoreError::AlreadyExists(_)) => {
                        let existing = self.store.get(&xr.key().expect("composites are named")).await?;
                        self.adopt(claim, Composite::new(existing)).await
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Some(reference) => match self.store.get(&reference.to_key()).await {
                Ok(existing) => self.adopt(claim, Composite::new(existing)).await,
                Err(err) if err.is_not_found() => {
                    // The recorded composite is gone (or never landed);
                    // recreate it under the recorded name.
                    let mut xr = self.synthesize(claim).await?;
                    xr.metadata.name = Some(reference.name.clone());
                    let created = self.store.create(&xr.0).await?;
                    Ok(Composite::new(created))
                }
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Verify (or record) the composite's back-pointer to this claim.
    async fn adopt(&self, claim: &Claim, mut xr: Composite) -> Result<Composite, EngineError> {
        match xr.claim_ref() {
            Some(existing)
                if existing.name != claim.name()
                    || existing.namespace.as_deref()
                        != claim.metadata.namespace.as_deref() =>
            {
                Err(EngineError::BindConflict {
                    message: format!(
                        "Composite {} is already bound to claim {}/{}",
                        xr.name(),
                        existing.namespace.as_deref().unwrap_or(""),
                        existing.name
                    ),
                })
            }
            Some(_) => Ok(xr),
            None => {
                xr.set_claim_ref(&claim.typed_ref());
                xr.0 = self.store.update(&xr.0).await?;
                Ok(xr)
            }
        }
    }

    /// Build (but do not persist) the composite a claim implies.
    async fn synthesize(&self, claim: &Claim) -> Result<Composite, EngineError> {
        let composition = self
            .revisions
            .select(claim.composition_ref(), claim.composition_selector())
            .await?;
        let composite_type = &composition.spec.composite_type_ref;

        let name = format!("{}-{}", claim.name(), name_suffix(claim.uid()));
        let mut obj = DynamicObject::new(
            composite_type.api_version.clone(),
            composite_type.kind.clone(),
        )
        .named(name.clone());
        obj.set_label(LABEL_CLAIM_NAME, claim.name());
        obj.set_label(
            LABEL_CLAIM_NAMESPACE,
            claim.metadata.namespace.clone().unwrap_or_default(),
        );

        // User-declared parameters copy over; claim-only machinery stays.
        if let Some(Value::Object(claim_spec)) = claim.data.get("spec") {
            let mut spec = serde_json::Map::new();
            for (key, value) in claim_spec {
                if !CLAIM_ONLY_FIELDS.contains(&key.as_str()) {
                    spec.insert(key.clone(), value.clone());
                }
            }
            obj.data.insert("spec".to_string(), Value::Object(spec));
        }

        let mut xr = Composite::new(obj);
        xr.set_claim_ref(&claim.typed_ref());
        if claim.write_connection_secret_to().is_some() {
            xr.set_write_connection_secret_to(&SecretRef {
                name: name.clone(),
                namespace: Some(self.namespace.clone()),
            });
        }
        Ok(xr)
    }

    /// Copy the claim-visible surface of the composite onto the claim.
    async fn propagate(&self, claim: &mut Claim, xr: &Composite) -> Result<(), EngineError> {
        let xr_conditions = xr.conditions();

        if let Some(ready) = xr_conditions.iter().find(|c| c.type_ == TYPE_READY) {
            claim.set_condition(ready.clone());
        }
        for type_ in xr.claim_condition_types() {
            if let Some(condition) = xr_conditions.iter().find(|c| c.type_ == type_) {
                claim.set_condition(condition.clone());
            }
        }
        claim.set_condition(Condition::synced());

        if let Some(at_provider) = xr.value_at("status.atProvider").cloned() {
            claim.set_value_at("status.atProvider", at_provider);
        }

        if let (Some(claim_secret), Some(xr_secret)) = (
            claim.write_connection_secret_to(),
            xr.write_connection_secret_to(),
        ) {
            let Some(xr_ns) = xr_secret.namespace else {
                return Ok(());
            };
            let details =
                read_owned_secret(self.store.as_ref(), &xr.0, &xr_secret.name, &xr_ns).await?;
            if !details.is_empty() {
                let namespace = claim
                    .metadata
                    .namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string());
                publish_secret(
                    self.store.as_ref(),
                    &claim.0,
                    &claim_secret.name,
                    &namespace,
                    &details,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Drive claim deletion per the composite delete policy.
    async fn finalize(&self, claim: &mut Claim) -> Result<Action, EngineError> {
        if !claim.metadata.finalizers.iter().any(|f| f == FINALIZER_CLAIM) {
            return Ok(Action::await_change());
        }

        let policy = claim.composite_delete_policy();
        if let Some(reference) = claim.resource_ref() {
            match self.store.get(&reference.to_key()).await {
                Ok(xr) => {
                    if xr.metadata.deletion_timestamp.is_none() {
                        self.store.delete(&reference.to_key()).await?;
                        tracing::info!(
                            claim = %claim.name(),
                            composite = %reference.name,
                            "Deleting composite for deleted claim"
                        );
                    }
                    if policy == CompositeDeletePolicy::Foreground {
                        // Keep the finalizer until the composite is gone.
                        return Ok(Action::requeue(FOREGROUND_WAIT));
                    }
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        claim.metadata.finalizers.retain(|f| f != FINALIZER_CLAIM);
        self.store.update(&claim.0).await?;
        Ok(Action::await_change())
    }
}

/// Deterministic suffix derived from the claim UID, so binder retries
/// converge on one composite name instead of leaking duplicates.
fn name_suffix(uid: &str) -> String {
    let cleaned: String = uid
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(5)
        .collect::<String>()
        .to_lowercase();
    if cleaned.is_empty() {
        "x".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl Reconciler for ClaimReconciler {
    type Key = ObjectKey;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, BoxError> {
        self.reconcile_claim(key).await.map_err(|e| e.into())
    }
}

/// Map a composite watch event back to its bound claim's key.
pub fn claim_key_of(xr: &DynamicObject, claim_type: &weft_api::TypeRef) -> Option<ObjectKey> {
    let composite = Composite::new(xr.clone());
    let reference = composite.claim_ref()?;
    Some(ObjectKey::namespaced(
        claim_type.clone(),
        reference.namespace.unwrap_or_default(),
        reference.name,
    ))
}
