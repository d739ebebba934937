//! Claim↔composite binder scenarios.

mod common;

use serde_json::json;
use weft_api::condition::TYPE_SYNCED;
use weft_api::meta::FINALIZER_CLAIM;
use weft_api::{
    get_condition, Claim, Composite, ConditionStatus, DynamicObject, ObjectKey, TypedRef,
};
use weft_core::Reconciler as _;
use weft_engine::{ClaimReconciler, REASON_BIND_ERROR};
use weft_store::ObjectStore as _;

use common::{harness, seed_composition, xr_type, Harness, XR_API_VERSION, XR_KIND};

const CLAIM_API_VERSION: &str = "example.org/v1";
const CLAIM_KIND: &str = "Database";

fn claim_reconciler(h: &Harness) -> ClaimReconciler {
    ClaimReconciler::new(h.store.clone(), "crossplane-system")
}

async fn seed_claim(h: &Harness, name: &str, composition: &str) -> ObjectKey {
    let mut claim = Claim::new(
        DynamicObject::new(CLAIM_API_VERSION, CLAIM_KIND)
            .named(name)
            .in_namespace("default"),
    );
    claim.set_composition_ref(composition);
    claim.set_value_at("spec.parameters.size", json!("small"));
    let created = h.store.create(&claim.0).await.unwrap();
    created.key().unwrap()
}

// An unbound claim synthesizes its composite and both back-pointers agree
// (binding symmetry).
#[tokio::test]
async fn binds_a_new_composite_symmetrically() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_claim(&h, "db", "db-comp").await;

    claim_reconciler(&h).reconcile(&key).await.unwrap();

    let claim = Claim::new(h.store.get(&key).await.unwrap());
    let reference = claim.resource_ref().expect("claim records its composite");
    assert_eq!(reference.kind, XR_KIND);
    assert!(reference.name.starts_with("db-"));

    let xr = Composite::new(h.store.get(&reference.to_key()).await.unwrap());
    let back = xr.claim_ref().expect("composite records its claim");
    assert_eq!(back.name, "db");
    assert_eq!(back.namespace.as_deref(), Some("default"));

    // User parameters copied, claim-only machinery not.
    assert_eq!(xr.value_at("spec.parameters.size"), Some(&json!("small")));
    assert!(xr.value_at("spec.resourceRef").is_none());

    // Binding is deterministic: a second reconcile changes nothing.
    claim_reconciler(&h).reconcile(&key).await.unwrap();
    let again = Claim::new(h.store.get(&key).await.unwrap());
    assert_eq!(again.resource_ref().unwrap().name, reference.name);
}

// S6: a claim pointing at a composite bound to someone else fails with a
// BindError condition and mutates nothing on the composite.
#[tokio::test]
async fn bind_conflict_is_terminal_and_non_destructive() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;

    // Composite X, already bound to claim B.
    let mut x = Composite::new(DynamicObject::new(XR_API_VERSION, XR_KIND).named("x"));
    x.set_claim_ref(&TypedRef {
        api_version: CLAIM_API_VERSION.to_string(),
        kind: CLAIM_KIND.to_string(),
        namespace: Some("default".to_string()),
        name: "claim-b".to_string(),
        uid: None,
    });
    let x = h.store.create(&x.0).await.unwrap();
    let x_version = x.metadata.resource_version.clone();

    // Claim A claims X.
    let key = seed_claim(&h, "claim-a", "db-comp").await;
    let mut claim_a = Claim::new(h.store.get(&key).await.unwrap());
    claim_a.set_resource_ref(&TypedRef {
        api_version: XR_API_VERSION.to_string(),
        kind: XR_KIND.to_string(),
        namespace: None,
        name: "x".to_string(),
        uid: None,
    });
    h.store.update(&claim_a.0).await.unwrap();

    claim_reconciler(&h).reconcile(&key).await.unwrap();

    let claim_a = Claim::new(h.store.get(&key).await.unwrap());
    let claim_a_conditions = claim_a.conditions();
    let synced = get_condition(&claim_a_conditions, TYPE_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.reason, REASON_BIND_ERROR);

    // X untouched.
    let x_after = h.store.get(&ObjectKey::cluster(xr_type(), "x")).await.unwrap();
    assert_eq!(x_after.metadata.resource_version, x_version);
    assert_eq!(
        Composite::new(x_after).claim_ref().unwrap().name,
        "claim-b"
    );
}

// S7: foreground deletion holds the claim's finalizer until the composite
// is gone.
#[tokio::test]
async fn foreground_delete_waits_for_the_composite() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_claim(&h, "db", "db-comp").await;

    // Bind first so a composite exists.
    claim_reconciler(&h).reconcile(&key).await.unwrap();
    let claim = Claim::new(h.store.get(&key).await.unwrap());
    assert!(claim.metadata.finalizers.contains(&FINALIZER_CLAIM.to_string()));
    let xr_key = claim.resource_ref().unwrap().to_key();

    // Switch to foreground deletion and delete the claim.
    let mut claim = claim;
    claim
        .0
        .set_value_at("spec.compositeDeletePolicy", json!("Foreground"));
    h.store.update(&claim.0).await.unwrap();
    h.store.delete(&key).await.unwrap();

    // First pass: composite deletion triggered, finalizer stays.
    claim_reconciler(&h).reconcile(&key).await.unwrap();
    let claim = Claim::new(h.store.get(&key).await.unwrap());
    assert!(claim.metadata.finalizers.contains(&FINALIZER_CLAIM.to_string()));

    // The composite is gone now; the next pass releases the claim.
    assert!(h.store.get(&xr_key).await.unwrap_err().is_not_found());
    claim_reconciler(&h).reconcile(&key).await.unwrap();
    assert!(h.store.get(&key).await.unwrap_err().is_not_found());
}

// Background deletion releases the claim without waiting.
#[tokio::test]
async fn background_delete_releases_immediately() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_claim(&h, "db", "db-comp").await;

    claim_reconciler(&h).reconcile(&key).await.unwrap();
    h.store.delete(&key).await.unwrap();

    claim_reconciler(&h).reconcile(&key).await.unwrap();
    assert!(h.store.get(&key).await.unwrap_err().is_not_found());
}

// A recorded composite that vanished is recreated under the recorded name,
// keeping the binding stable.
#[tokio::test]
async fn vanished_composite_is_recreated_under_its_recorded_name() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_claim(&h, "db", "db-comp").await;

    claim_reconciler(&h).reconcile(&key).await.unwrap();
    let claim = Claim::new(h.store.get(&key).await.unwrap());
    let xr_key = claim.resource_ref().unwrap().to_key();

    // Someone deletes the composite out from under the claim.
    h.store.delete(&xr_key).await.unwrap();
    assert!(h.store.get(&xr_key).await.unwrap_err().is_not_found());

    claim_reconciler(&h).reconcile(&key).await.unwrap();
    let recreated = Composite::new(h.store.get(&xr_key).await.unwrap());
    assert_eq!(recreated.claim_ref().unwrap().name, "db");

    let claim = Claim::new(h.store.get(&key).await.unwrap());
    assert_eq!(claim.resource_ref().unwrap().name, xr_key.name);
}

// The claim sees only whitelisted condition types from its composite.
#[tokio::test]
async fn propagates_only_claim_visible_conditions() {
    let h = harness();
    seed_composition(&h, "db-comp", &["compose"]).await;
    let key = seed_claim(&h, "db", "db-comp").await;

    claim_reconciler(&h).reconcile(&key).await.unwrap();
    let claim = Claim::new(h.store.get(&key).await.unwrap());
    let xr_key = claim.resource_ref().unwrap().to_key();

    // The composite carries one whitelisted and one private condition.
    let mut xr = Composite::new(h.store.get(&xr_key).await.unwrap());
    xr.set_condition(weft_api::Condition::new(
        "DatabaseProvisioned",
        ConditionStatus::True,
        "Provisioned",
    ));
    xr.set_condition(weft_api::Condition::new(
        "InternalDetail",
        ConditionStatus::True,
        "Internal",
    ));
    xr.set_claim_condition_types(&["DatabaseProvisioned".to_string()]);
    h.store.update(&xr.0).await.unwrap();

    claim_reconciler(&h).reconcile(&key).await.unwrap();
    let claim = Claim::new(h.store.get(&key).await.unwrap());
    let conditions = claim.conditions();
    assert!(get_condition(&conditions, "DatabaseProvisioned").is_some());
    assert!(get_condition(&conditions, "InternalDetail").is_none());
}
