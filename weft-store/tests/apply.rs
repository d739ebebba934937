//! Apply semantics against injected store failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use weft_api::{DynamicObject, ObjectKey, TypeRef};
use weft_store::{apply, BoxWatchStream, InMemoryStore, ObjectStore, StoreError};

/// Delegates to an in-memory store, failing the first update with a
/// conflict the way a racing writer would.
struct ConflictOnce {
    inner: InMemoryStore,
    tripped: AtomicBool,
}

impl ConflictOnce {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ObjectStore for ConflictOnce {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        self.inner.get(key).await
    }

    async fn list(
        &self,
        type_ref: &TypeRef,
        namespace: Option<&str>,
        selector: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        self.inner.list(type_ref, namespace, selector).await
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.inner.create(obj).await
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Conflict {
                key: obj.key().expect("updates carry a key"),
                message: "lost the race".to_string(),
            });
        }
        self.inner.update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    async fn watch(&self, type_ref: &TypeRef) -> BoxWatchStream {
        self.inner.watch(type_ref).await
    }
}

fn bucket(region: &str) -> DynamicObject {
    let mut obj = DynamicObject::new("s3.example/v1", "Bucket").named("b");
    obj.set_value_at("spec.region", json!(region));
    obj
}

#[tokio::test]
async fn conflicted_apply_retries_once_from_a_fresh_read() {
    let store = ConflictOnce::new();
    store.inner.create(&bucket("us-east-1")).await.unwrap();

    let applied = apply(&store, &bucket("eu-west-1")).await.unwrap();
    assert_eq!(applied.value_at("spec.region"), Some(&json!("eu-west-1")));
}

#[tokio::test]
async fn apply_creates_then_patches_then_noops() {
    let store = InMemoryStore::new();

    let first = apply(&store, &bucket("us-east-1")).await.unwrap();
    let second = apply(&store, &bucket("us-east-1")).await.unwrap();
    assert_eq!(
        first.metadata.resource_version, second.metadata.resource_version,
        "identical desired state must not write"
    );

    let third = apply(&store, &bucket("eu-west-1")).await.unwrap();
    assert_ne!(first.metadata.resource_version, third.metadata.resource_version);
    assert_eq!(third.value_at("spec.region"), Some(&json!("eu-west-1")));
}

#[tokio::test]
async fn apply_removes_fields_it_stops_managing() {
    let store = InMemoryStore::new();

    let mut with_tags = bucket("us-east-1");
    with_tags.set_value_at("spec.tags.team", json!("storage"));
    apply(&store, &with_tags).await.unwrap();

    // The next apply no longer wants the tag.
    let applied = apply(&store, &bucket("us-east-1")).await.unwrap();
    assert_eq!(applied.value_at("spec.tags.team"), None);
}
