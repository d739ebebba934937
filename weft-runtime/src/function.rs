//! Function revision runtime reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use weft_api::meta::{ENGINE_TLS_CLIENT_SECRET_NAME, TLS_SERVER_SECRET_SUFFIX};
use weft_api::{
    to_dynamic, Deployment, DynamicObject, FunctionRevision, ObjectKey, OwnerReference,
    PackageRevisionDesiredState, RuntimeConfig, RuntimeConfigSpec,
};
use weft_core::{Action, BoxError, Reconciler};
use weft_store::{apply, get_as, ObjectStore};
use weft_tls::{LeafUsage, TlsBootstrap};

use crate::manifests::{RuntimeManifests, GRPC_PORT};

pub struct FunctionRevisionReconciler {
    store: Arc<dyn ObjectStore>,
    tls: TlsBootstrap,
    manifests: RuntimeManifests,
}

impl FunctionRevisionReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        namespace: impl Into<String>,
        default_registry: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            tls: TlsBootstrap::new(store.clone(), namespace.clone()),
            manifests: RuntimeManifests::new(namespace, default_registry),
            store,
        }
    }

    async fn reconcile_revision(&self, key: &ObjectKey) -> Result<Action, BoxError> {
        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() => return Ok(Action::await_change()),
            Err(err) => return Err(err.into()),
        };
        let revision: FunctionRevision = match obj.try_into_typed(&FunctionRevision::type_ref()) {
            Ok(revision) => revision,
            Err(err) => {
                // Malformed; nothing to do until the revision changes.
                tracing::warn!(revision = %obj.name(), error = %err, "Undecodable function revision");
                return Ok(Action::await_change());
            }
        };
        if obj.metadata.deletion_timestamp.is_some() {
            // The deployment follows via its owner reference.
            return Ok(Action::await_change());
        }

        match revision.spec.desired_state {
            PackageRevisionDesiredState::Active => self.activate(&obj, &revision).await,
            PackageRevisionDesiredState::Inactive => self.deactivate(&obj, &revision).await,
        }
    }

    async fn activate(
        &self,
        obj: &DynamicObject,
        revision: &FunctionRevision,
    ) -> Result<Action, BoxError> {
        let name = revision.metadata.name.clone().unwrap_or_default();
        let package = revision.package_name();
        let server_secret = revision
            .spec
            .tls_server_secret_name
            .clone()
            .unwrap_or_else(|| format!("{package}{TLS_SERVER_SECRET_SUFFIX}"));

        let ca = self.tls.ensure_ca().await?;
        self.tls
            .ensure_leaf(
                &ca,
                &server_secret,
                &self.manifests.service_dns_names(&package),
                LeafUsage::Server,
                Some(obj),
            )
            .await?;
        // The engine's own client identity, shared across every function.
        self.tls
            .ensure_leaf(
                &ca,
                ENGINE_TLS_CLIENT_SECRET_NAME,
                &["crossplane".to_string()],
                LeafUsage::Client,
                None,
            )
            .await?;

        let overrides = self.runtime_overrides(revision).await?;

        let service = self.manifests.service(&package, &name, &[GRPC_PORT]);
        self.apply_owned(&to_dynamic(&service), obj).await?;

        let deployment =
            self.manifests
                .deployment(&name, &revision.spec.image, &overrides, &server_secret, None, &[]);
        // External service-account management is allowed: only apply ours
        // when the deployment actually references one.
        if let Some(sa) = &deployment.spec.template.spec.service_account_name {
            let account = self.manifests.service_account(sa);
            self.apply_owned(&to_dynamic(&account), obj).await?;
        }
        self.apply_deployment(&deployment, obj).await?;

        let endpoint = self.manifests.endpoint(&package);
        if revision.status.endpoint.as_deref() != Some(&endpoint) {
            let mut updated = obj.clone();
            updated.set_value_at("status.endpoint", json!(endpoint.clone()));
            self.store.update(&updated).await?;
            tracing::info!(revision = %name, %endpoint, "Published function endpoint");
        }
        Ok(Action::await_change())
    }

    async fn deactivate(
        &self,
        obj: &DynamicObject,
        revision: &FunctionRevision,
    ) -> Result<Action, BoxError> {
        let name = revision.metadata.name.clone().unwrap_or_default();
        let key = ObjectKey::namespaced(
            Deployment::type_ref(),
            self.manifests.namespace.clone(),
            name.clone(),
        );
        match self.store.delete(&key).await {
            Ok(()) => {
                tracing::info!(revision = %name, "Deleted runtime deployment for inactive revision");
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        // Service and TLS secrets are keyed per package and stay.

        if revision.status.endpoint.is_some() {
            let mut updated = obj.clone();
            updated.set_value_at("status.endpoint", serde_json::Value::Null);
            self.store.update(&updated).await?;
        }
        Ok(Action::await_change())
    }

    async fn runtime_overrides(
        &self,
        revision: &FunctionRevision,
    ) -> Result<RuntimeConfigSpec, BoxError> {
        match &revision.spec.runtime_config_ref {
            Some(reference) => {
                let config: RuntimeConfig = get_as(
                    self.store.as_ref(),
                    &ObjectKey::cluster(RuntimeConfig::type_ref(), reference.name.clone()),
                )
                .await?;
                Ok(config.spec)
            }
            None => Ok(RuntimeConfigSpec::default()),
        }
    }

    async fn apply_owned(
        &self,
        desired: &DynamicObject,
        owner: &DynamicObject,
    ) -> Result<DynamicObject, BoxError> {
        let mut desired = desired.clone();
        desired
            .set_controller_ref(OwnerReference::controller(owner))
            .map_err(|e| e.to_string())?;
        Ok(apply(self.store.as_ref(), &desired).await?)
    }

    /// Apply the deployment, handling the immutable-selector migration:
    /// delete and report a retryable error so the next reconcile recreates
    /// it with the new selector.
    async fn apply_deployment(
        &self,
        deployment: &Deployment,
        owner: &DynamicObject,
    ) -> Result<(), BoxError> {
        match self.apply_owned(&to_dynamic(deployment), owner).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let immutable = err
                    .downcast_ref::<weft_store::StoreError>()
                    .is_some_and(weft_store::StoreError::is_immutable);
                if !immutable {
                    return Err(err);
                }
                let name = deployment.metadata.name.clone().unwrap_or_default();
                let key = ObjectKey::namespaced(
                    Deployment::type_ref(),
                    self.manifests.namespace.clone(),
                    name.clone(),
                );
                self.store.delete(&key).await.ok();
                tracing::warn!(
                    deployment = %name,
                    "Deployment selector changed; deleted for recreation"
                );
                Err(format!("deployment {name} selector changed; recreating").into())
            }
        }
    }
}

#[async_trait]
impl Reconciler for FunctionRevisionReconciler {
    type Key = ObjectKey;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, BoxError> {
        self.reconcile_revision(key).await
    }
}
