//! Create-or-patch with a three-way merge.
//!
//! The previous applied state is kept in the last-applied annotation, so a
//! field the engine once set and no longer wants is removed, while fields
//! other writers own (status, defaulted fields) are left alone.

use serde_json::Value;
use weft_api::meta::ANNOTATION_LAST_APPLIED;
use weft_api::DynamicObject;

use crate::error::StoreError;
use crate::store::ObjectStore;

/// Merge `desired` over `current`, honoring deletions relative to
/// `last_applied`.
///
/// Objects merge key-by-key; arrays and scalars are replaced wholesale. A
/// key present in `last_applied` but absent from `desired` is removed.
pub fn merge_desired(last_applied: Option<&Value>, current: &Value, desired: &Value) -> Value {
    let (desired_map, current_map) = match (desired.as_object(), current.as_object()) {
        (Some(d), Some(c)) => (d, c),
        _ => return desired.clone(),
    };

    let mut result = current_map.clone();
    for (key, desired_value) in desired_map {
        let nested_last = last_applied.and_then(|v| v.get(key));
        let merged = match current_map.get(key) {
            Some(current_value) => merge_desired(nested_last, current_value, desired_value),
            None => desired_value.clone(),
        };
        result.insert(key.clone(), merged);
    }
    if let Some(Value::Object(last_map)) = last_applied {
        for key in last_map.keys() {
            if !desired_map.contains_key(key) {
                result.remove(key);
            }
        }
    }
    Value::Object(result)
}

/// Serialize the applied intent, without identity or server-managed fields
/// (or the annotation itself). Identity is excluded so an object created via
/// `generateName` stamps the same intent as later applies naming it.
fn last_applied_of(desired: &DynamicObject) -> Result<String, StoreError> {
    let mut stripped = desired.clone();
    stripped.metadata.name = None;
    stripped.metadata.generate_name = None;
    stripped.metadata.namespace = None;
    stripped.metadata.uid = None;
    stripped.metadata.resource_version = None;
    stripped.metadata.creation_timestamp = None;
    stripped.metadata.deletion_timestamp = None;
    stripped.metadata.generation = None;
    stripped.metadata.annotations.remove(ANNOTATION_LAST_APPLIED);
    serde_json::to_string(&stripped).map_err(|e| StoreError::Invalid {
        message: e.to_string(),
    })
}

fn stamp(obj: &mut DynamicObject) -> Result<(), StoreError> {
    let annotation = last_applied_of(obj)?;
    obj.metadata
        .annotations
        .insert(ANNOTATION_LAST_APPLIED.to_string(), annotation);
    Ok(())
}

/// Create `desired` if absent, otherwise three-way merge and update.
///
/// Writes that lose an optimistic-concurrency race are retried once from a
/// fresh read; an update that changes nothing is skipped entirely.
pub async fn apply(
    store: &dyn ObjectStore,
    desired: &DynamicObject,
) -> Result<DynamicObject, StoreError> {
    let mut attempt = 0;
    loop {
        attempt += 1;

        let key = match desired.key() {
            Some(key) => key,
            None => {
                // Name assignment is deferred to the store via generateName;
                // there is nothing to merge against yet.
                let mut obj = desired.clone();
                stamp(&mut obj)?;
                return store.create(&obj).await;
            }
        };

        let current = match store.get(&key).await {
            Ok(current) => current,
            Err(err) if err.is_not_found() => {
                let mut obj = desired.clone();
                stamp(&mut obj)?;
                match store.create(&obj).await {
                    Ok(created) => return Ok(created),
                    Err(StoreError::AlreadyExists(_)) if attempt == 1 => continue,
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        let last_applied: Option<Value> = current
            .metadata
            .annotations
            .get(ANNOTATION_LAST_APPLIED)
            .and_then(|raw| serde_json::from_str(raw).ok());

        let current_value = serde_json::to_value(&current).map_err(|e| StoreError::Invalid {
            message: e.to_string(),
        })?;
        let mut desired_stripped = desired.clone();
        desired_stripped.metadata.annotations.remove(ANNOTATION_LAST_APPLIED);
        let desired_value =
            serde_json::to_value(&desired_stripped).map_err(|e| StoreError::Invalid {
                message: e.to_string(),
            })?;

        let merged_value = merge_desired(last_applied.as_ref(), &current_value, &desired_value);
        let mut merged: DynamicObject =
            serde_json::from_value(merged_value).map_err(|e| StoreError::Invalid {
                message: e.to_string(),
            })?;

        // The store owns identity and concurrency metadata.
        merged.metadata.name = current.metadata.name.clone();
        merged.metadata.namespace = current.metadata.namespace.clone();
        merged.metadata.uid = current.metadata.uid.clone();
        merged.metadata.resource_version = current.metadata.resource_version.clone();
        merged.metadata.creation_timestamp = current.metadata.creation_timestamp;
        merged.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
        merged.metadata.generation = current.metadata.generation;
        merged
            .metadata
            .annotations
            .insert(ANNOTATION_LAST_APPLIED.to_string(), last_applied_of(desired)?);

        if merged == current {
            return Ok(current);
        }

        match store.update(&merged).await {
            Ok(updated) => return Ok(updated),
            Err(err) if err.is_conflict() && attempt == 1 => continue,
            Err(err) => return Err(err),
        }
    }
}
