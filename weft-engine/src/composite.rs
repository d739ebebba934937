//! The composite (XR) reconciler.
//!
//! One reconcile is an idempotent recomputation: load the composite, pin its
//! revision, observe its composed resources, run the pipeline, apply the
//! diff, then project status. Nothing is carried between reconciles beyond
//! what the store holds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use weft_api::condition::{REASON_CREATING, TYPE_READY, TYPE_SYNCED};
use weft_api::meta::LABEL_RESOURCE_NAME;
use weft_api::{
    Composite, CompositionRevision, CompositionUpdatePolicy, Condition, ConditionStatus,
    DynamicObject, ObjectKey, TypeRef,
};
use weft_core::{Action, BoxError, EngineConfig, Reconciler};
use weft_proto::v1::Target;
use weft_store::{update_if_changed, EventRecorder, EventType, ObjectStore, StoreError};

use crate::composed::ComposedReconciler;
use crate::connection::{publish_composite_secret, read_composed_connection};
use crate::environment::resolve_environment;
use crate::error::EngineError;
use crate::materialize::materialize;
use crate::pipeline::{PipelineInput, PipelineRunner};
use crate::revision::RevisionManager;

/// Ready=False reason when the pipeline produced no composed resources.
pub const REASON_NO_COMPOSED: &str = "NoComposedResources";
/// Synced=False reason when a step's requirements never stabilized.
pub const REASON_REQUIREMENTS_UNSTABLE: &str = "ComposedResourcesRequirementsUnstable";
/// Synced=False reason when a claimed slot belongs to someone else.
pub const REASON_ALREADY_OWNED: &str = "AlreadyOwned";

/// Default requeue when a terminal condition wants another look.
const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Long wait after a schema conflict (e.g. an immutable field).
const SCHEMA_CONFLICT_WAIT: Duration = Duration::from_secs(300);

pub struct CompositeReconciler {
    store: Arc<dyn ObjectStore>,
    revisions: RevisionManager,
    pipeline: PipelineRunner,
    composed: ComposedReconciler,
    recorder: EventRecorder,
    config: EngineConfig,
}

impl CompositeReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pipeline: PipelineRunner,
        config: EngineConfig,
    ) -> Self {
        Self {
            revisions: RevisionManager::new(store.clone()),
            composed: ComposedReconciler::new(store.clone()),
            recorder: EventRecorder::new(store.clone()),
            store,
            pipeline,
            config,
        }
    }

    async fn reconcile_composite(&self, key: &ObjectKey) -> Result<Action, EngineError> {
        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() => return Ok(Action::await_change()),
            Err(err) => return Err(err.into()),
        };
        if obj.metadata.deletion_timestamp.is_some() {
            // Composed resources follow via their owner references.
            return Ok(Action::await_change());
        }
        let mut xr = Composite::new(obj);
        let deadline = Instant::now() + self.config.reconcile_timeout;

        let revision = match self.resolve_revision(&mut xr).await {
            Ok(revision) => revision,
            Err(err) => return self.degrade(&mut xr, err).await,
        };

        let (observed, observed_connection) = self.observe(&xr).await?;

        let environment = match resolve_environment(
            self.store.as_ref(),
            &revision.spec.composition.environment_configs,
        )
        .await
        {
            Ok(environment) => environment,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => return self.degrade(&mut xr, err).await,
        };

        let output = match self
            .pipeline
            .run(PipelineInput {
                xr: &xr,
                revision: &revision,
                observed: &observed,
                observed_connection: &observed_connection,
                environment: environment.as_ref(),
                deadline,
            })
            .await
        {
            Ok(output) => output,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => return self.degrade(&mut xr, err).await,
        };

        let revision_name = revision.metadata.name.clone().unwrap_or_default();
        let intents = match materialize(&xr, &revision_name, &output.desired_resources) {
            Ok(intents) => intents,
            Err(err) => return self.degrade(&mut xr, err).await,
        };

        let outcome = match self
            .composed
            .reconcile(&xr, &revision, &intents, &observed)
            .await
        {
            Ok(outcome) => outcome,
            Err(EngineError::Store(StoreError::Invalid { message })) => {
                // Schema conflict: surface a warning and back off for long.
                xr.set_condition(
                    Condition::new(TYPE_SYNCED, ConditionStatus::False, "SchemaConflict")
                        .with_message(message.clone()),
                );
                self.recorder
                    .record(&xr.0, EventType::Warning, "ComposeResources", &message)
                    .await;
                self.persist_status(&mut xr).await?;
                return Ok(Action::requeue(SCHEMA_CONFLICT_WAIT));
            }
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => return self.degrade(&mut xr, err).await,
        };

        xr.set_resource_refs(&outcome.refs);

        // Functions own the composite's desired status; user-facing spec
        // fields stay with the user between reconciles.
        if let Some(desired) = &output.desired_composite {
            merge_desired_composite(&mut xr, desired);
        }

        let mut claim_visible = xr.claim_condition_types();
        for condition in &output.conditions {
            if condition.target() == Target::CompositeAndClaim
                && !claim_visible.contains(&condition.r#type)
            {
                claim_visible.push(condition.r#type.clone());
            }
            xr.set_condition(condition.to_api());
        }
        xr.set_claim_condition_types(&claim_visible);

        for result in &output.results {
            let event_type = match result.severity() {
                weft_proto::Severity::Warning => EventType::Warning,
                _ => EventType::Normal,
            };
            self.recorder
                .record(&xr.0, event_type, "ComposeResources", &result.message)
                .await;
        }

        let mut details = output.composite_connection.clone();
        details.extend(
            outcome
                .connection_details
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if !details.is_empty() {
            match publish_composite_secret(self.store.as_ref(), &xr, &details).await {
                Ok(_) => {}
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => return self.degrade(&mut xr, err).await,
            }
        }

        if intents.is_empty() {
            xr.set_condition(Condition::unready(REASON_NO_COMPOSED));
        } else if outcome.ready {
            xr.set_condition(Condition::ready());
        } else {
            xr.set_condition(
                Condition::unready(REASON_CREATING)
                    .with_message(format!("Waiting for: {}", outcome.unready.join(", "))),
            );
        }
        xr.set_condition(Condition::synced());

        self.persist_status(&mut xr).await?;

        let ready = xr
            .conditions()
            .iter()
            .any(|c| c.type_ == TYPE_READY && c.is_true());
        Ok(match output.ttl {
            Some(ttl) => Action::requeue(ttl),
            None if !ready => Action::requeue(DEFAULT_TTL),
            None => Action::await_change(),
        })
    }

    /// Resolve the revision this reconcile runs against, pinning the
    /// composite to it first so the choice is durable.
    async fn resolve_revision(
        &self,
        xr: &mut Composite,
    ) -> Result<CompositionRevision, EngineError> {
        if xr.composition_update_policy() == CompositionUpdatePolicy::Manual {
            if let Some(pinned) = xr.composition_revision_ref() {
                return self.revisions.get(&pinned).await;
            }
        }

        let composition = self.revisions.select_composition(xr).await?;
        let latest = self.revisions.latest_for(&composition).await?;
        let name = latest.metadata.name.clone().unwrap_or_default();
        if xr.composition_revision_ref().as_deref() != Some(&name) {
            xr.set_composition_revision_ref(&name);
            let updated = self.store.update(&xr.0).await?;
            xr.0 = updated;
        }
        Ok(latest)
    }

    /// Load observed composed resources (by recorded reference, verified by
    /// label) and their trusted connection details.
    #[allow(clippy::type_complexity)]
    async fn observe(
        &self,
        xr: &Composite,
    ) -> Result<
        (
            BTreeMap<String, DynamicObject>,
            BTreeMap<String, BTreeMap<String, Vec<u8>>>,
        ),
        EngineError,
    > {
        let mut observed = BTreeMap::new();
        let mut connection = BTreeMap::new();
        for reference in xr.resource_refs() {
            let obj = match self.store.get(&reference.to_key()).await {
                Ok(obj) => obj,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            };
            let Some(name) = obj.metadata.labels.get(LABEL_RESOURCE_NAME).cloned() else {
                continue;
            };
            let details = read_composed_connection(self.store.as_ref(), &obj).await?;
            if !details.is_empty() {
                connection.insert(name.clone(), details);
            }
            observed.insert(name, obj);
        }
        Ok((observed, connection))
    }

    /// Terminal-error path: set conditions, emit the event, persist and pick
    /// the requeue the taxonomy prescribes.
    async fn degrade(&self, xr: &mut Composite, err: EngineError) -> Result<Action, EngineError> {
        let (condition, action) = match &err {
            EngineError::FatalResult {
                message,
                ttl,
                conditions,
                ..
            } => {
                for condition in conditions {
                    xr.set_condition(condition.to_api());
                }
                (
                    Condition::not_synced(message.clone()),
                    Action::requeue(ttl.unwrap_or(DEFAULT_TTL)),
                )
            }
            EngineError::Function(inner) if matches!(inner, weft_fn::FunctionError::RequirementsUnstable { .. }) => (
                Condition::new(TYPE_SYNCED, ConditionStatus::False, REASON_REQUIREMENTS_UNSTABLE)
                    .with_message(err.to_string()),
                Action::requeue(DEFAULT_TTL),
            ),
            EngineError::AlreadyOwned { .. } => (
                Condition::new(TYPE_SYNCED, ConditionStatus::False, REASON_ALREADY_OWNED)
                    .with_message(err.to_string()),
                Action::requeue(DEFAULT_TTL),
            ),
            // Recoverable by user action; watchers fire when the missing
            // dependency appears.
            EngineError::MissingComposition { .. } | EngineError::MissingEndpoint { .. } => (
                Condition::not_synced(err.to_string()),
                Action::await_change(),
            ),
            // Unrecoverable until the revision itself changes.
            EngineError::MalformedRevision { .. } => (
                Condition::not_synced(err.to_string()),
                Action::await_change(),
            ),
            _ => (
                Condition::not_synced(err.to_string()),
                Action::requeue(DEFAULT_TTL),
            ),
        };

        tracing::warn!(composite = %xr.name(), error = %err, "Reconcile degraded");
        xr.set_condition(condition);
        self.recorder
            .record(&xr.0, EventType::Warning, "ComposeResources", &err.to_string())
            .await;
        self.persist_status(xr).await?;
        Ok(action)
    }

    async fn persist_status(&self, xr: &mut Composite) -> Result<(), EngineError> {
        match update_if_changed(self.store.as_ref(), &xr.0).await {
            Ok(updated) => {
                xr.0 = updated;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Merge the function-desired composite onto the live one: status merges
/// deeply, labels and annotations add, everything else is left to the user.
fn merge_desired_composite(xr: &mut Composite, desired: &DynamicObject) {
    if let Some(Value::Object(desired_status)) = desired.data.get("status") {
        let mut status = match xr.0.data.get("status") {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        deep_merge(&mut status, desired_status);
        xr.0.data.insert("status".to_string(), Value::Object(status));
    }
    for (key, value) in &desired.metadata.labels {
        xr.0.metadata
            .labels
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    for (key, value) in &desired.metadata.annotations {
        xr.0.metadata
            .annotations
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

fn deep_merge(base: &mut serde_json::Map<String, Value>, overlay: &serde_json::Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// A controller key for composites of one kind.
#[async_trait]
impl Reconciler for CompositeReconciler {
    type Key = ObjectKey;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, BoxError> {
        self.reconcile_composite(key).await.map_err(|e| e.into())
    }
}

/// Map a composed-resource watch event back to its composite's key.
pub fn composite_key_of(composed: &DynamicObject, xr_type: &TypeRef) -> Option<ObjectKey> {
    let name = composed
        .metadata
        .labels
        .get(weft_api::meta::LABEL_COMPOSITE)?;
    Some(ObjectKey::cluster(xr_type.clone(), name.clone()))
}
