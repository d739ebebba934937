//! Provider revision runtime reconciler.
//!
//! The flow mirrors the function hook, with two differences: providers also
//! hold a client certificate (mounted for webhook calls) and their runtime
//! exposes a webhook port next to the gRPC one.

use std::sync::Arc;

use async_trait::async_trait;
use weft_api::meta::{TLS_CLIENT_SECRET_SUFFIX, TLS_SERVER_SECRET_SUFFIX};
use weft_api::{
    to_dynamic, Deployment, DynamicObject, ObjectKey, OwnerReference,
    PackageRevisionDesiredState, ProviderRevision, RuntimeConfig, RuntimeConfigSpec,
};
use weft_core::{Action, BoxError, Reconciler};
use weft_store::{apply, get_as, ObjectStore};
use weft_tls::{LeafUsage, TlsBootstrap};

use crate::manifests::{RuntimeManifests, GRPC_PORT, WEBHOOK_PORT};

pub struct ProviderRevisionReconciler {
    store: Arc<dyn ObjectStore>,
    tls: TlsBootstrap,
    manifests: RuntimeManifests,
}

impl ProviderRevisionReconciler {
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
        let revision: ProviderRevision = match obj.try_into_typed(&ProviderRevision::type_ref()) {
            Ok(revision) => revision,
            Err(err) => {
                tracing::warn!(revision = %obj.name(), error = %err, "Undecodable provider revision");
                return Ok(Action::await_change());
            }
        };
        if obj.metadata.deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        match revision.spec.desired_state {
            PackageRevisionDesiredState::Active => self.activate(&obj, &revision).await,
            PackageRevisionDesiredState::Inactive => self.deactivate(&revision).await,
        }
    }

    async fn activate(
        &self,
        obj: &DynamicObject,
        revision: &ProviderRevision,
    ) -> Result<Action, BoxError> {
        let name = revision.metadata.name.clone().unwrap_or_default();
        let package = revision.package_name();
        let server_secret = revision
            .spec
            .tls_server_secret_name
            .clone()
            .unwrap_or_else(|| format!("{package}{TLS_SERVER_SECRET_SUFFIX}"));
        let client_secret = revision
            .spec
            .tls_client_secret_name
            .clone()
            .unwrap_or_else(|| format!("{package}{TLS_CLIENT_SECRET_SUFFIX}"));

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
        self.tls
            .ensure_leaf(
                &ca,
                &client_secret,
                &[name.clone()],
                LeafUsage::Client,
                Some(obj),
            )
            .await?;

        let overrides = self.runtime_overrides(revision).await?;

        let service = self
            .manifests
            .service(&package, &name, &[GRPC_PORT, WEBHOOK_PORT]);
        self.apply_owned(&to_dynamic(&service), obj).await?;

        let deployment = self.manifests.deployment(
            &name,
            &revision.spec.image,
            &overrides,
            &server_secret,
            Some(&client_secret),
            &[WEBHOOK_PORT],
        );
        if let Some(sa) = &deployment.spec.template.spec.service_account_name {
            let account = self.manifests.service_account(sa);
            self.apply_owned(&to_dynamic(&account), obj).await?;
        }
        match self.apply_owned(&to_dynamic(&deployment), obj).await {
            Ok(_) => {}
            Err(err) => {
                let immutable = err
                    .downcast_ref::<weft_store::StoreError>()
                    .is_some_and(weft_store::StoreError::is_immutable);
                if !immutable {
                    return Err(err);
                }
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
                return Err(format!("deployment {name} selector changed; recreating").into());
            }
        }
        Ok(Action::await_change())
    }

    async fn deactivate(&self, revision: &ProviderRevision) -> Result<Action, BoxError> {
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
        Ok(Action::await_change())
    }

    async fn runtime_overrides(
        &self,
        revision: &ProviderRevision,
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
}

#[async_trait]
impl Reconciler for ProviderRevisionReconciler {
    type Key = ObjectKey;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, BoxError> {
        self.reconcile_revision(key).await
    }
}
