//! The object store trait and watch events.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use weft_api::{ConvertError, DynamicObject, ObjectKey, TypeRef};

use crate::error::StoreError;

/// One change observed on the store's watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The object was created or updated.
    Applied(DynamicObject),
    /// The object is gone.
    Deleted(DynamicObject),
}

impl WatchEvent {
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

pub type BoxWatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// The engine's window onto the control-plane object store.
///
/// Writes use optimistic concurrency: `update` carries the resource version
/// the caller observed, and the store answers `Conflict` when it moved.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError>;

    /// List objects of one type, optionally namespace-scoped and filtered by
    /// a label selector (all entries must match).
    async fn list(
        &self,
        type_ref: &TypeRef,
        namespace: Option<&str>,
        selector: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Create the object, honoring `generateName` when no name is set.
    /// Returns the stored object with name, uid and resource version filled.
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace the object. Fails with `Conflict` when the carried resource
    /// version is stale, `NotFound` when the object is gone.
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Delete the object. Objects holding finalizers are only marked for
    /// deletion; they disappear when the last finalizer is removed.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Subscribe to changes of one type. The stream yields events from the
    /// point of subscription; callers list first to prime their view.
    async fn watch(&self, type_ref: &TypeRef) -> BoxWatchStream;
}

/// Get an object and convert it into a typed representation.
pub async fn get_as<T: serde::de::DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
) -> Result<T, StoreError> {
    let obj = store.get(key).await?;
    obj.try_into_typed(&key.type_ref)
        .map_err(|e: ConvertError| StoreError::Invalid {
            message: e.to_string(),
        })
}

/// Update only when the object differs from what the store holds, so
/// steady-state reconciles don't churn resource versions (and with them the
/// watch streams that trigger reconciles).
pub async fn update_if_changed(
    store: &dyn ObjectStore,
    obj: &DynamicObject,
) -> Result<DynamicObject, StoreError> {
    if let Some(key) = obj.key() {
        if let Ok(current) = store.get(&key).await {
            if &current == obj {
                return Ok(current);
            }
        }
    }
    store.update(obj).await
}
