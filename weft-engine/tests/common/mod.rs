//! Shared harness: an in-memory store, scripted functions and a fully wired
//! composite reconciler.

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

use std::sync::Arc;

use weft_api::{
    to_dynamic, Composite, Composition, CompositionSpec, DynamicObject, FunctionRef, ObjectKey,
    PipelineStep, TypeRef,
};
use weft_core::EngineConfig;
use weft_engine::{CompositeReconciler, FunctionEndpointResolver, PipelineRunner};
use weft_fn::{ExtraResourcesFetcher, FunctionRunner, RunnerConfig};
use weft_store::{InMemoryStore, ObjectStore};
use weft_test::{active_function_revision, FakeFunctions};

pub const XR_API_VERSION: &str = "example.org/v1";
pub const XR_KIND: &str = "XDatabase";

pub fn xr_type() -> TypeRef {
    TypeRef::new(XR_API_VERSION, XR_KIND)
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub functions: Arc<FakeFunctions>,
    pub reconciler: CompositeReconciler,
}

pub fn harness() -> Harness {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let functions = Arc::new(FakeFunctions::new());

    let runner = FunctionRunner::new(
        functions.clone(),
        RunnerConfig {
            allow_insecure: true,
            ..RunnerConfig::default()
        },
    );
    let fetcher = ExtraResourcesFetcher::new(store.clone());
    let resolver = FunctionEndpointResolver::new(store.clone(), "crossplane-system");
    let pipeline = PipelineRunner::new(runner, fetcher, resolver, store.clone());
    let reconciler = CompositeReconciler::new(store.clone(), pipeline, EngineConfig::default());

    Harness {
        store,
        functions,
        reconciler,
    }
}

/// Seed a composition whose steps are named as given (each step `s` served
/// by function `fn-s`), plus an active revision per function.
pub async fn seed_composition(harness: &Harness, name: &str, steps: &[&str]) {
    let composition = Composition::new(
        name,
        CompositionSpec {
            composite_type_ref: xr_type(),
            pipeline: steps
                .iter()
                .map(|step| PipelineStep {
                    step: step.to_string(),
                    function_ref: FunctionRef {
                        name: format!("fn-{step}"),
                    },
                    input: None,
                    credentials: vec![],
                })
                .collect(),
            ..CompositionSpec::default()
        },
    );
    harness
        .store
        .create(&to_dynamic(&composition))
        .await
        .unwrap();

    for step in steps {
        let function = format!("fn-{step}");
        let revision =
            active_function_revision(&function, &format!("{function}.crossplane-system.svc:9443"));
        harness
            .store
            .create(&to_dynamic(&revision))
            .await
            .unwrap();
    }
}

/// Seed a composite referencing `composition`, returning its key.
pub async fn seed_xr(harness: &Harness, name: &str, composition: &str) -> ObjectKey {
    let mut xr = Composite::new(DynamicObject::new(XR_API_VERSION, XR_KIND).named(name));
    xr.set_composition_ref(composition);
    let created = harness.store.create(&xr.0).await.unwrap();
    created.key().unwrap()
}

pub async fn get_xr(harness: &Harness, key: &ObjectKey) -> Composite {
    Composite::new(harness.store.get(key).await.unwrap())
}
