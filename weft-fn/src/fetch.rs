//! Resolves a function's resource selectors into live objects.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use weft_api::{DynamicObject, ObjectKey, ResourceMatch, ResourceSelector};
use weft_proto::{Resource, Resources};
use weft_store::{ObjectStore, StoreError};

use crate::error::FunctionError;

/// Fetches extra resources on behalf of a function.
#[derive(Clone)]
pub struct ExtraResourcesFetcher {
    store: Arc<dyn ObjectStore>,
}

impl ExtraResourcesFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Resolve one selector. A named object that does not exist yields an
    /// empty result, not an error; any other store failure fails the fetch.
    pub async fn fetch(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        match &selector.matcher {
            ResourceMatch::Name(name) => {
                let key = ObjectKey::cluster(selector.type_ref(), name.clone());
                match self.store.get(&key).await {
                    Ok(obj) => Ok(vec![obj]),
                    Err(err) if err.is_not_found() => Ok(Vec::new()),
                    Err(err) => Err(err),
                }
            }
            ResourceMatch::Labels(labels) => {
                self.store
                    .list(&selector.type_ref(), None, Some(labels))
                    .await
            }
        }
    }

    /// Resolve a full requirements set into wire form.
    ///
    /// All-or-nothing: a failure on any selector fails the whole fetch so
    /// the function never observes partial results.
    pub async fn fetch_all(
        &self,
        function: &str,
        requirements: &BTreeMap<String, ResourceSelector>,
    ) -> Result<HashMap<String, Resources>, FunctionError> {
        let mut resolved = HashMap::with_capacity(requirements.len());
        for (name, selector) in requirements {
            let objects = self.fetch(selector).await.map_err(FunctionError::Fetch)?;
            tracing::debug!(
                function,
                requirement = %name,
                count = objects.len(),
                "Resolved extra resources"
            );
            resolved.insert(
                name.clone(),
                Resources {
                    items: objects.iter().map(Resource::from_object).collect(),
                },
            );
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::InMemoryStore;

    fn config_map(name: &str) -> DynamicObject {
        DynamicObject::new("v1", "ConfigMap").named(name)
    }

    #[tokio::test]
    async fn by_name_missing_yields_empty() {
        let store = Arc::new(InMemoryStore::new());
        let fetcher = ExtraResourcesFetcher::new(store);
        let found = fetcher
            .fetch(&ResourceSelector::by_name("v1", "ConfigMap", "absent"))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn by_name_yields_exactly_one() {
        let store = Arc::new(InMemoryStore::new());
        store.create(&config_map("cm-a")).await.unwrap();
        let fetcher = ExtraResourcesFetcher::new(store);
        let found = fetcher
            .fetch(&ResourceSelector::by_name("v1", "ConfigMap", "cm-a"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "cm-a");
    }

    #[tokio::test]
    async fn by_labels_yields_all_matches() {
        let store = Arc::new(InMemoryStore::new());
        for name in ["a", "b", "c"] {
            let mut obj = config_map(name);
            if name != "c" {
                obj.set_label("tier", "gold");
            }
            store.create(&obj).await.unwrap();
        }
        let fetcher = ExtraResourcesFetcher::new(store);

        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "gold".to_string());
        let found = fetcher
            .fetch(&ResourceSelector::by_labels("v1", "ConfigMap", labels))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn fetch_all_wraps_wire_resources() {
        let store = Arc::new(InMemoryStore::new());
        store.create(&config_map("cm-a")).await.unwrap();
        let fetcher = ExtraResourcesFetcher::new(store);

        let mut requirements = BTreeMap::new();
        requirements.insert(
            "config".to_string(),
            ResourceSelector::by_name("v1", "ConfigMap", "cm-a"),
        );
        let resolved = fetcher.fetch_all("fn", &requirements).await.unwrap();
        assert_eq!(resolved["config"].items.len(), 1);
        let obj = resolved["config"].items[0].try_to_object().unwrap();
        assert_eq!(obj.name(), "cm-a");
    }
}
