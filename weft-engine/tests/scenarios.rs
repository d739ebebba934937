//! End-to-end pipeline scenarios against the in-memory store.

mod common;

use std::time::Duration;

use serde_json::json;
use weft_api::condition::{TYPE_READY, TYPE_SYNCED};
use weft_api::meta::{LABEL_COMPOSITE_UID, LABEL_RESOURCE_NAME};
use weft_api::{get_condition, ConditionStatus, ObjectKey, TypeRef};
use weft_core::Action;
use weft_core::Reconciler as _;
use weft_engine::{REASON_NO_COMPOSED, REASON_REQUIREMENTS_UNSTABLE};
use weft_store::ObjectStore as _;
use weft_test::ResponseBuilder;

use common::{get_xr, harness, seed_composition, seed_xr};

fn bucket_body() -> serde_json::Value {
    json!({
        "apiVersion": "s3.example/v1",
        "kind": "Bucket",
        "spec": { "region": "us-east-1" }
    })
}

fn bucket_type() -> TypeRef {
    TypeRef::new("s3.example/v1", "Bucket")
}

// S1: a single-step identity pipeline produces a synced composite with no
// composed resources.
#[tokio::test]
async fn identity_pipeline_syncs_without_composed_resources() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.functions.script_echo("compose");
    h.reconciler.reconcile(&key).await.unwrap();

    let xr = get_xr(&h, &key).await;
    let conditions = xr.conditions();
    let synced = get_condition(&conditions, TYPE_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::True);
    let ready = get_condition(&conditions, TYPE_READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, REASON_NO_COMPOSED);

    let buckets = h.store.list(&bucket_type(), None, None).await.unwrap();
    assert!(buckets.is_empty());
    assert_eq!(h.functions.calls("compose"), 1);

    // The reconcile pinned a revision snapshot.
    assert!(xr.composition_revision_ref().is_some());
}

// Environment configs referenced by the composition are merged and seeded
// into the engine-owned context key.
#[tokio::test]
async fn environment_is_seeded_into_the_context() {
    use weft_api::meta::CONTEXT_KEY_ENVIRONMENT;

    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.store
        .create(&weft_api::to_dynamic(&weft_api::EnvironmentConfig::new(
            "region-defaults",
            json!({ "region": "eu-west-1" }).as_object().cloned().unwrap(),
        )))
        .await
        .unwrap();

    // Point the composition at the environment config.
    let comp_key = weft_api::ObjectKey::cluster(
        weft_api::Composition::type_ref(),
        "db-comp".to_string(),
    );
    let mut composition = h.store.get(&comp_key).await.unwrap();
    composition.set_value_at(
        "spec.environmentConfigs",
        json!([{ "name": "region-defaults" }]),
    );
    h.store.update(&composition).await.unwrap();

    h.functions.script_echo("compose");
    h.reconciler.reconcile(&key).await.unwrap();

    let requests = h.functions.requests();
    let environment = requests[0]
        .context
        .get(CONTEXT_KEY_ENVIRONMENT)
        .expect("environment key seeded");
    let parsed: serde_json::Value = serde_json::from_slice(environment).unwrap();
    assert_eq!(parsed["region"], "eu-west-1");
}

// Step credentials load from their secrets and ride along on the request.
#[tokio::test]
async fn step_credentials_are_loaded_from_secrets() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    let mut secret = weft_api::Secret::new("cloud-creds", "crossplane-system");
    secret.insert("token", "s3cr3t");
    h.store
        .create(&weft_api::to_dynamic(&secret))
        .await
        .unwrap();

    let comp_key = weft_api::ObjectKey::cluster(
        weft_api::Composition::type_ref(),
        "db-comp".to_string(),
    );
    let mut composition: weft_api::Composition = h
        .store
        .get(&comp_key)
        .await
        .unwrap()
        .try_into_typed(&weft_api::Composition::type_ref())
        .unwrap();
    composition.spec.pipeline[0].credentials = vec![weft_api::FunctionCredentials {
        name: "cloud".to_string(),
        secret_ref: weft_api::CredentialSecretRef {
            name: "cloud-creds".to_string(),
            namespace: "crossplane-system".to_string(),
        },
    }];
    h.store
        .update(&weft_api::to_dynamic(&composition))
        .await
        .unwrap();

    h.functions.script_echo("compose");
    h.reconciler.reconcile(&key).await.unwrap();

    let requests = h.functions.requests();
    let credentials = requests[0]
        .credentials
        .get("cloud")
        .expect("credentials forwarded");
    match credentials.source.as_ref().unwrap() {
        weft_proto::v1::CredentialsSource::CredentialData(data) => {
            assert_eq!(data.data.get("token").map(Vec::as_slice), Some(b"s3cr3t".as_ref()));
        }
    }
}

// S2: a composed object is created with ownership labels, and the composite
// becomes Ready once the object reports Ready.
#[tokio::test]
async fn composed_object_is_created_and_readiness_propagates() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.functions.always(
        "compose",
        ResponseBuilder::new()
            .desired_resource("bucket", &bucket_body())
            .build(),
    );
    h.reconciler.reconcile(&key).await.unwrap();

    let xr = get_xr(&h, &key).await;
    let buckets = h.store.list(&bucket_type(), None, None).await.unwrap();
    assert_eq!(buckets.len(), 1);
    let bucket = &buckets[0];
    assert_eq!(
        bucket.metadata.labels.get(LABEL_COMPOSITE_UID),
        Some(&xr.uid().to_string())
    );
    assert_eq!(
        bucket.metadata.labels.get(LABEL_RESOURCE_NAME),
        Some(&"bucket".to_string())
    );
    assert!(bucket.is_controlled_by(xr.uid()));
    assert!(bucket.name().starts_with("db-1-"));

    let conditions = xr.conditions();
    let ready = get_condition(&conditions, TYPE_READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::False);

    // The bucket reports Ready; the next reconcile lifts the composite.
    let mut updated = bucket.clone();
    updated.set_value_at(
        "status.conditions",
        json!([{ "type": "Ready", "status": "True" }]),
    );
    h.store.update(&updated).await.unwrap();

    h.reconciler.reconcile(&key).await.unwrap();
    let xr = get_xr(&h, &key).await;
    let conditions = xr.conditions();
    let ready = get_condition(&conditions, TYPE_READY).unwrap();
    assert_eq!(ready.status, ConditionStatus::True);
}

// S3: stable requirements invoke the function exactly twice and feed it the
// resolved resources.
#[tokio::test]
async fn stable_requirements_invoke_twice_then_proceed() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;
    h.store
        .create(&weft_api::DynamicObject::new("v1", "ConfigMap").named("cm-a"))
        .await
        .unwrap();

    h.functions.script(
        "compose",
        ResponseBuilder::new()
            .require_by_name("r", "v1", "ConfigMap", "cm-a")
            .build(),
    );
    h.functions.script(
        "compose",
        ResponseBuilder::new()
            .require_by_name("r", "v1", "ConfigMap", "cm-a")
            .build(),
    );

    h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(h.functions.calls("compose"), 2);
    let requests = h.functions.requests();
    assert!(requests[0].extra_resources.is_empty());
    assert_eq!(requests[1].extra_resources["r"].items.len(), 1);

    let xr = get_xr(&h, &key).await;
    let conditions = xr.conditions();
    let synced = get_condition(&conditions, TYPE_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::True);
}

// S4: requirements that never stabilize hit the cap and surface a terminal
// condition; nothing is applied.
#[tokio::test]
async fn oscillating_requirements_are_terminal() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    for object in ["cm-a", "cm-b", "cm-a", "cm-b", "cm-a"] {
        h.functions.script(
            "compose",
            ResponseBuilder::new()
                .desired_resource("bucket", &bucket_body())
                .require_by_name("r", "v1", "ConfigMap", object)
                .build(),
        );
    }

    let action = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    assert_eq!(h.functions.calls("compose"), 5);

    let xr = get_xr(&h, &key).await;
    let conditions = xr.conditions();
    let synced = get_condition(&conditions, TYPE_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.reason, REASON_REQUIREMENTS_UNSTABLE);

    let buckets = h.store.list(&bucket_type(), None, None).await.unwrap();
    assert!(buckets.is_empty());
}

// S5: a fatal result in the middle of the pipeline stops everything after
// it and nothing is applied.
#[tokio::test]
async fn fatal_result_short_circuits_the_pipeline() {
    let h = harness();
    seed_composition(&h, "db-comp", &["one", "two", "three"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.functions.script(
        "one",
        ResponseBuilder::new()
            .desired_resource("bucket", &bucket_body())
            .build(),
    );
    h.functions.script(
        "two",
        ResponseBuilder::new()
            .fatal("bad input")
            .ttl(Duration::from_secs(30))
            .build(),
    );

    let action = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    assert_eq!(h.functions.calls("one"), 1);
    assert_eq!(h.functions.calls("two"), 1);
    assert_eq!(h.functions.calls("three"), 0);

    let xr = get_xr(&h, &key).await;
    let conditions = xr.conditions();
    let synced = get_condition(&conditions, TYPE_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.message.as_deref(), Some("bad input"));

    // Step one wanted a bucket, but the fatal step aborted before apply.
    let buckets = h.store.list(&bucket_type(), None, None).await.unwrap();
    assert!(buckets.is_empty());
}

// The context blob round-trips between steps byte-for-byte.
#[tokio::test]
async fn context_threads_between_steps() {
    let h = harness();
    seed_composition(&h, "db-comp", &["one", "two"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.functions.script(
        "one",
        ResponseBuilder::new()
            .context("fn.example/state", b"opaque-blob")
            .build(),
    );
    h.functions.script_echo("two");

    h.reconciler.reconcile(&key).await.unwrap();

    let requests = h.functions.requests();
    let second = requests
        .iter()
        .find(|r| r.meta.as_ref().map(|m| m.tag.as_str()) == Some("two"))
        .unwrap();
    assert_eq!(
        second.context.get("fn.example/state").map(Vec::as_slice),
        Some(b"opaque-blob".as_ref())
    );
}

// Reconciling twice against unchanged observed state yields byte-identical
// desired objects (idempotence).
#[tokio::test]
async fn reconcile_is_idempotent_on_stable_observed_state() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.functions.always(
        "compose",
        ResponseBuilder::new()
            .desired_resource("bucket", &bucket_body())
            .build(),
    );

    h.reconciler.reconcile(&key).await.unwrap();
    let first = h.store.list(&bucket_type(), None, None).await.unwrap();

    h.reconciler.reconcile(&key).await.unwrap();
    let second = h.store.list(&bucket_type(), None, None).await.unwrap();

    // Same object, same resource version: the second pass was a no-op.
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].metadata.name, second[0].metadata.name);
    assert_eq!(
        first[0].metadata.resource_version,
        second[0].metadata.resource_version
    );
}

// A composed slot removed from desired state is deleted from the store.
#[tokio::test]
async fn removed_slots_are_garbage_collected() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.functions.script(
        "compose",
        ResponseBuilder::new()
            .desired_resource("bucket", &bucket_body())
            .build(),
    );
    h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(h.store.list(&bucket_type(), None, None).await.unwrap().len(), 1);

    // Next run desires nothing.
    h.functions.script("compose", ResponseBuilder::new().build());
    h.reconciler.reconcile(&key).await.unwrap();
    assert!(h.store.list(&bucket_type(), None, None).await.unwrap().is_empty());
}

// A missing composition surfaces as a condition and waits for its creation.
#[tokio::test]
async fn missing_composition_degrades_and_waits() {
    let h = harness();
    let key = seed_xr(&h, "db-1", "absent-comp").await;

    let action = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::await_change());

    let xr = get_xr(&h, &key).await;
    let conditions = xr.conditions();
    let synced = get_condition(&conditions, TYPE_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert!(synced
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("absent-comp"));
}

// Functions projecting conditions with a claim target whitelist them for
// claim propagation.
#[tokio::test]
async fn claim_targeted_conditions_are_whitelisted() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    h.functions.script(
        "compose",
        ResponseBuilder::new()
            .condition(
                "DatabaseProvisioned",
                weft_proto::v1::ConditionStatus::True,
                weft_proto::v1::Target::CompositeAndClaim,
            )
            .build(),
    );
    h.reconciler.reconcile(&key).await.unwrap();

    let xr = get_xr(&h, &key).await;
    assert!(xr
        .claim_condition_types()
        .contains(&"DatabaseProvisioned".to_string()));
    assert!(get_condition(&xr.conditions(), "DatabaseProvisioned").is_some());
}

// The composite's connection secret aggregates function-declared details.
#[tokio::test]
async fn connection_details_reach_the_composite_secret() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_xr(&h, "db-1", "db-comp").await;

    // The composite wants its connection details published.
    let mut xr = get_xr(&h, &key).await;
    xr.set_write_connection_secret_to(&weft_api::SecretRef {
        name: "db-1-conn".to_string(),
        namespace: Some("crossplane-system".to_string()),
    });
    h.store.update(&xr.0).await.unwrap();

    h.functions.script(
        "compose",
        ResponseBuilder::new()
            .composite_connection("endpoint", b"db.example:5432")
            .build(),
    );
    h.reconciler.reconcile(&key).await.unwrap();

    let secret_key = ObjectKey::namespaced(
        weft_api::Secret::type_ref(),
        "crossplane-system",
        "db-1-conn",
    );
    let secret = h.store.get(&secret_key).await.unwrap();
    let typed: weft_api::Secret = secret
        .try_into_typed(&weft_api::Secret::type_ref())
        .unwrap();
    assert_eq!(typed.get("endpoint"), Some(b"db.example:5432".as_ref()));
}
