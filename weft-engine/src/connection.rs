//! Connection detail harvesting and publication.
//!
//! A composed resource's connection secret is only trusted when that secret
//! is controlled by the composed resource itself; anything else could be a
//! crafted reference escaping RBAC. The composite's secret is written once
//! per reconcile, skipped entirely on byte equality.

use std::collections::BTreeMap;

use weft_api::{Composite, DynamicObject, ObjectKey, OwnerReference, Secret, SecretRef};
use weft_store::{ObjectStore, StoreError};

use crate::error::EngineError;

/// Read one composed resource's connection secret, enforcing the
/// controller-UID check. Resources without a secret ref, or whose secret
/// does not exist yet, yield an empty map.
pub async fn read_composed_connection(
    store: &dyn ObjectStore,
    composed: &DynamicObject,
) -> Result<BTreeMap<String, Vec<u8>>, EngineError> {
    let secret_ref: Option<SecretRef> = composed.get_at("spec.writeConnectionSecretToRef");
    let Some(secret_ref) = secret_ref else {
        return Ok(BTreeMap::new());
    };
    let Some(namespace) = secret_ref.namespace else {
        return Ok(BTreeMap::new());
    };

    let key = ObjectKey::namespaced(Secret::type_ref(), namespace, secret_ref.name);
    let obj = match store.get(&key).await {
        Ok(obj) => obj,
        Err(err) if err.is_not_found() => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };

    if !obj.is_controlled_by(composed.uid()) {
        tracing::warn!(
            secret = %key,
            composed = %composed.name(),
            "Connection secret is not controlled by its composed resource; ignoring"
        );
        return Ok(BTreeMap::new());
    }

    let secret: Secret = obj
        .try_into_typed(&Secret::type_ref())
        .map_err(|e| EngineError::Store(StoreError::Invalid {
            message: e.to_string(),
        }))?;
    Ok(secret
        .data
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}

/// Write the composite's connection secret, create-or-update with a no-op
/// check on byte equality. Returns whether a write happened.
pub async fn publish_composite_secret(
    store: &dyn ObjectStore,
    xr: &Composite,
    details: &BTreeMap<String, Vec<u8>>,
) -> Result<bool, EngineError> {
    let Some(secret_ref) = xr.write_connection_secret_to() else {
        return Ok(false);
    };
    let Some(namespace) = secret_ref.namespace else {
        tracing::warn!(
            composite = %xr.name(),
            "writeConnectionSecretToRef has no namespace; skipping"
        );
        return Ok(false);
    };
    publish_secret(store, &xr.0, &secret_ref.name, &namespace, details).await
}

/// Write a connection secret controlled by `owner`, create-or-update with a
/// no-op check on byte equality. Returns whether a write happened.
pub async fn publish_secret(
    store: &dyn ObjectStore,
    owner: &DynamicObject,
    name: &str,
    namespace: &str,
    details: &BTreeMap<String, Vec<u8>>,
) -> Result<bool, EngineError> {
    let mut secret = Secret::new(name, namespace);
    secret.type_ = Some("connection.crossplane.io/v1alpha1".to_string());
    for (key, value) in details {
        secret.data.insert(key.clone(), value.clone().into());
    }
    let mut desired = weft_api::to_dynamic(&secret);
    desired
        .set_controller_ref(OwnerReference::controller(owner))
        .map_err(|conflict| EngineError::AlreadyOwned {
            key: ObjectKey::namespaced(Secret::type_ref(), namespace, name),
            controller_uid: conflict.existing.uid,
        })?;

    let key = ObjectKey::namespaced(Secret::type_ref(), namespace, name);
    match store.get(&key).await {
        Ok(existing) => {
            if !existing.is_controlled_by(owner.uid()) {
                return Err(EngineError::AlreadyOwned {
                    key,
                    controller_uid: existing
                        .controller_ref()
                        .map(|r| r.uid.clone())
                        .unwrap_or_default(),
                });
            }
            let current: Secret = existing
                .try_into_typed(&Secret::type_ref())
                .map_err(|e| EngineError::Store(StoreError::Invalid {
                    message: e.to_string(),
                }))?;
            if current.data == secret.data {
                return Ok(false);
            }
            desired.metadata.resource_version = existing.metadata.resource_version.clone();
            desired.metadata.uid = existing.metadata.uid.clone();
            store.update(&desired).await?;
            Ok(true)
        }
        Err(err) if err.is_not_found() => {
            store.create(&desired).await?;
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

/// Read a connection secret verifying `owner` controls it. Missing secrets
/// yield an empty map; a foreign controller is an error (unlike composed
/// harvesting, the caller asked for this specific secret).
pub async fn read_owned_secret(
    store: &dyn ObjectStore,
    owner: &DynamicObject,
    name: &str,
    namespace: &str,
) -> Result<BTreeMap<String, Vec<u8>>, EngineError> {
    let key = ObjectKey::namespaced(Secret::type_ref(), namespace, name);
    let obj = match store.get(&key).await {
        Ok(obj) => obj,
        Err(err) if err.is_not_found() => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    if !obj.is_controlled_by(owner.uid()) {
        return Err(EngineError::AlreadyOwned {
            key,
            controller_uid: obj
                .controller_ref()
                .map(|r| r.uid.clone())
                .unwrap_or_default(),
        });
    }
    let secret: Secret = obj
        .try_into_typed(&Secret::type_ref())
        .map_err(|e| EngineError::Store(StoreError::Invalid {
            message: e.to_string(),
        }))?;
    Ok(secret.data.into_iter().map(|(k, v)| (k, v.0)).collect())
}
