//! Environment resolution.
//!
//! The engine merges the EnvironmentConfigs a composition references, in
//! declaration order, into one JSON document seeded into the pipeline
//! context under the engine-owned key.

use std::sync::Arc;

use serde_json::{Map, Value};
use weft_api::{EnvironmentConfig, EnvironmentSourceRef, ObjectKey};
use weft_store::ObjectStore;

use crate::error::EngineError;

/// Merge `overlay` onto `base`: objects merge key-by-key, everything else
/// replaces.
fn merge_values(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_values(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Load and merge the referenced environment configs. Later references win.
/// Returns `None` when the composition references none.
pub async fn resolve_environment(
    store: &dyn ObjectStore,
    refs: &[EnvironmentSourceRef],
) -> Result<Option<Value>, EngineError> {
    if refs.is_empty() {
        return Ok(None);
    }

    let mut merged = Map::new();
    for source in refs {
        let key = ObjectKey::cluster(EnvironmentConfig::type_ref(), source.name.clone());
        let obj = store.get(&key).await?;
        let config: EnvironmentConfig = obj
            .try_into_typed(&EnvironmentConfig::type_ref())
            .map_err(|e| EngineError::MalformedRevision {
                name: source.name.clone(),
                message: e.to_string(),
            })?;
        merge_values(&mut merged, &config.data);
    }
    Ok(Some(Value::Object(merged)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_api::to_dynamic;
    use weft_store::InMemoryStore;

    fn env(name: &str, data: Value) -> EnvironmentConfig {
        let map = data.as_object().cloned().unwrap_or_default();
        EnvironmentConfig::new(name, map)
    }

    #[tokio::test]
    async fn later_references_win() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(&to_dynamic(&env(
                "base",
                json!({ "region": "us-east-1", "tags": { "team": "storage" } }),
            )))
            .await
            .unwrap();
        store
            .create(&to_dynamic(&env(
                "override",
                json!({ "region": "eu-west-1", "tags": { "tier": "gold" } }),
            )))
            .await
            .unwrap();

        let refs = vec![
            EnvironmentSourceRef {
                name: "base".to_string(),
            },
            EnvironmentSourceRef {
                name: "override".to_string(),
            },
        ];
        let merged = resolve_environment(store.as_ref(), &refs)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged["region"], "eu-west-1");
        assert_eq!(merged["tags"]["team"], "storage");
        assert_eq!(merged["tags"]["tier"], "gold");
    }

    #[tokio::test]
    async fn no_references_yield_none() {
        let store = Arc::new(InMemoryStore::new());
        let merged = resolve_environment(store.as_ref(), &[]).await.unwrap();
        assert!(merged.is_none());
    }

    #[tokio::test]
    async fn missing_config_fails_the_resolve() {
        let store = Arc::new(InMemoryStore::new());
        let refs = vec![EnvironmentSourceRef {
            name: "absent".to_string(),
        }];
        assert!(resolve_environment(store.as_ref(), &refs).await.is_err());
    }
}
