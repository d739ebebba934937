//! In-memory object store.
//!
//! Backs tests and local development with the same semantics the engine
//! relies on in production: generateName, UID and resource-version
//! assignment, optimistic concurrency, finalizer-aware deletion,
//! controller-owner garbage collection and per-type watch streams.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;
use weft_api::{DynamicObject, ObjectKey, TypeRef};

use crate::error::StoreError;
use crate::store::{BoxWatchStream, ObjectStore, WatchEvent};

const WATCH_BUFFER: usize = 256;

#[derive(Default)]
struct Shared {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    watchers: HashMap<TypeRef, broadcast::Sender<WatchEvent>>,
    version: u64,
}

impl Shared {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn notify(&self, event: WatchEvent) {
        if let Some(sender) = self.watchers.get(&event.object().type_ref()) {
            // Nobody listening is fine; events are best-effort hints.
            let _ = sender.send(event);
        }
    }

    /// Remove `key` and cascade to everything controlled by the removed
    /// objects. Objects holding finalizers are only marked.
    fn remove_cascading(&mut self, key: &ObjectKey) {
        let mut pending = vec![key.clone()];
        while let Some(key) = pending.pop() {
            let obj = match self.objects.get(&key) {
                Some(obj) => obj.clone(),
                None => continue,
            };
            if !obj.metadata.finalizers.is_empty() {
                if obj.metadata.deletion_timestamp.is_none() {
                    let mut marked = obj;
                    marked.metadata.deletion_timestamp = Some(Utc::now());
                    marked.metadata.resource_version = Some(self.next_version());
                    self.objects.insert(key, marked.clone());
                    self.notify(WatchEvent::Applied(marked));
                }
                continue;
            }
            self.objects.remove(&key);
            let uid = obj.uid().to_string();
            self.notify(WatchEvent::Deleted(obj));
            if !uid.is_empty() {
                let children: Vec<ObjectKey> = self
                    .objects
                    .values()
                    .filter(|o| o.is_controlled_by(&uid))
                    .filter_map(|o| o.key())
                    .collect();
                pending.extend(children);
            }
        }
    }
}

/// An in-memory [`ObjectStore`].
#[derive(Default)]
pub struct InMemoryStore {
    shared: RwLock<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without create-time validation, for tests that need a
    /// precise starting state. Assigns a UID if none is set.
    pub async fn seed(&self, mut obj: DynamicObject) -> DynamicObject {
        let mut shared = self.shared.write().await;
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(Uuid::new_v4().to_string());
        }
        if obj.metadata.resource_version.is_none() {
            let version = shared.next_version();
            obj.metadata.resource_version = Some(version);
        }
        let key = obj.key().expect("seeded objects carry a name");
        shared.objects.insert(key, obj.clone());
        shared.notify(WatchEvent::Applied(obj.clone()));
        obj
    }

    fn validate_immutable(existing: &DynamicObject, incoming: &DynamicObject) -> Result<(), StoreError> {
        // The one schema immutability the engine depends on: a deployment's
        // selector cannot change in place.
        if existing.api_version == "apps/v1" && existing.kind == "Deployment" {
            let previous = existing.value_at("spec.selector");
            let next = incoming.value_at("spec.selector");
            if previous.is_some() && previous != next {
                return Err(StoreError::Invalid {
                    message: "spec.selector: field is immutable".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let shared = self.shared.read().await;
        shared
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list(
        &self,
        type_ref: &TypeRef,
        namespace: Option<&str>,
        selector: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let shared = self.shared.read().await;
        Ok(shared
            .objects
            .values()
            .filter(|obj| &obj.type_ref() == type_ref)
            .filter(|obj| match namespace {
                Some(ns) => obj.metadata.namespace.as_deref() == Some(ns),
                None => true,
            })
            .filter(|obj| match selector {
                Some(labels) => obj.matches_labels(labels),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let mut shared = self.shared.write().await;
        let mut stored = obj.clone();

        if stored.metadata.name.is_none() {
            let base = stored.metadata.generate_name.clone().ok_or_else(|| {
                StoreError::Invalid {
                    message: "either name or generateName is required".to_string(),
                }
            })?;
            loop {
                let suffix: String = Uuid::new_v4().simple().to_string()[..5].to_string();
                let candidate = format!("{base}{suffix}");
                let key = ObjectKey {
                    type_ref: stored.type_ref(),
                    namespace: stored.metadata.namespace.clone(),
                    name: candidate.clone(),
                };
                if !shared.objects.contains_key(&key) {
                    stored.metadata.name = Some(candidate);
                    break;
                }
            }
        }

        let key = stored.key().expect("name assigned above");
        if shared.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        let version = shared.next_version();
        stored.metadata.resource_version = Some(version);
        stored.metadata.generation = Some(1);
        stored.metadata.creation_timestamp = Some(Utc::now());
        stored.metadata.deletion_timestamp = None;

        shared.objects.insert(key, stored.clone());
        shared.notify(WatchEvent::Applied(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = obj.key().ok_or_else(|| StoreError::Invalid {
            message: "update requires a name".to_string(),
        })?;
        let mut shared = self.shared.write().await;
        let existing = shared
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if let Some(version) = &obj.metadata.resource_version {
            if existing.metadata.resource_version.as_ref() != Some(version) {
                return Err(StoreError::Conflict {
                    key,
                    message: format!(
                        "stale resource version {version} (current {})",
                        existing.metadata.resource_version.as_deref().unwrap_or("?")
                    ),
                });
            }
        }

        Self::validate_immutable(&existing, obj)?;

        let mut stored = obj.clone();
        // Identity and lifecycle metadata are store-owned.
        stored.metadata.uid = existing.metadata.uid.clone();
        stored.metadata.creation_timestamp = existing.metadata.creation_timestamp;
        stored.metadata.deletion_timestamp = existing.metadata.deletion_timestamp;

        // A marked object disappears when its last finalizer is removed.
        if stored.metadata.deletion_timestamp.is_some() && stored.metadata.finalizers.is_empty() {
            shared.objects.remove(&key);
            shared.notify(WatchEvent::Deleted(stored.clone()));
            let uid = stored.uid().to_string();
            let children: Vec<ObjectKey> = shared
                .objects
                .values()
                .filter(|o| o.is_controlled_by(&uid))
                .filter_map(|o| o.key())
                .collect();
            for child in children {
                shared.remove_cascading(&child);
            }
            return Ok(stored);
        }

        let spec_changed = {
            let mut before = existing.data.clone();
            let mut after = stored.data.clone();
            before.remove("status");
            after.remove("status");
            before != after
        };
        let generation = existing.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if spec_changed { generation + 1 } else { generation });
        let version = shared.next_version();
        stored.metadata.resource_version = Some(version);

        shared.objects.insert(key, stored.clone());
        shared.notify(WatchEvent::Applied(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut shared = self.shared.write().await;
        if !shared.objects.contains_key(key) {
            return Err(StoreError::NotFound(key.clone()));
        }
        shared.remove_cascading(key);
        Ok(())
    }

    async fn watch(&self, type_ref: &TypeRef) -> BoxWatchStream {
        let mut shared = self.shared.write().await;
        let sender = shared
            .watchers
            .entry(type_ref.clone())
            .or_insert_with(|| broadcast::channel(WATCH_BUFFER).0);
        let receiver = sender.subscribe();
        BroadcastStream::new(receiver)
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }
}
