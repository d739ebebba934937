//! Resolving a function name to a dialable endpoint.
//!
//! The pipeline only knows logical function names; the runtime hook
//! publishes each active revision's endpoint and TLS secrets. This resolver
//! joins the two.

use std::sync::Arc;

use weft_api::meta::{
    ENGINE_TLS_CLIENT_SECRET_NAME, SECRET_KEY_CA_CERT, SECRET_KEY_TLS_CERT, SECRET_KEY_TLS_KEY,
};
use weft_api::{FunctionRevision, ObjectKey, PackageRevisionDesiredState, Secret};
use weft_fn::{ClientTlsBundle, FunctionEndpoint};
use weft_store::{get_as, ObjectStore};

use crate::error::EngineError;

#[derive(Clone)]
pub struct FunctionEndpointResolver {
    store: Arc<dyn ObjectStore>,
    /// Namespace holding package runtimes and TLS secrets.
    namespace: String,
}

impl FunctionEndpointResolver {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Resolve `function` to the endpoint of its active revision.
    pub async fn resolve(&self, function: &str) -> Result<FunctionEndpoint, EngineError> {
        let revisions = self
            .store
            .list(&FunctionRevision::type_ref(), None, None)
            .await?;

        let mut active: Vec<FunctionRevision> = revisions
            .iter()
            .filter_map(|obj| obj.try_into_typed(&FunctionRevision::type_ref()).ok())
            .filter(|r: &FunctionRevision| {
                r.package_name() == function
                    && r.spec.desired_state == PackageRevisionDesiredState::Active
            })
            .collect();
        active.sort_by_key(|r| r.spec.revision);

        let revision = active
            .into_iter()
            .rev()
            .find(|r| r.status.endpoint.is_some())
            .ok_or_else(|| EngineError::MissingEndpoint {
                function: function.to_string(),
            })?;
        let address = revision
            .status
            .endpoint
            .clone()
            .expect("filtered on endpoint presence");

        let tls = match &revision.spec.tls_server_secret_name {
            Some(server_secret) => Some(self.client_bundle(function, server_secret).await?),
            None => None,
        };

        Ok(FunctionEndpoint { address, tls })
    }

    /// Trust anchor from the function's server secret, identity from the
    /// engine's own client secret.
    async fn client_bundle(
        &self,
        function: &str,
        server_secret: &str,
    ) -> Result<ClientTlsBundle, EngineError> {
        let server: Secret = get_as(
            self.store.as_ref(),
            &ObjectKey::namespaced(
                Secret::type_ref(),
                self.namespace.clone(),
                server_secret.to_string(),
            ),
        )
        .await?;
        let client: Secret = get_as(
            self.store.as_ref(),
            &ObjectKey::namespaced(
                Secret::type_ref(),
                self.namespace.clone(),
                ENGINE_TLS_CLIENT_SECRET_NAME.to_string(),
            ),
        )
        .await?;

        let ca_cert = server.get(SECRET_KEY_CA_CERT);
        let client_cert = client.get(SECRET_KEY_TLS_CERT);
        let client_key = client.get(SECRET_KEY_TLS_KEY);
        match (ca_cert, client_cert, client_key) {
            (Some(ca), Some(cert), Some(key)) => Ok(ClientTlsBundle {
                ca_cert: ca.to_vec(),
                client_cert: cert.to_vec(),
                client_key: key.to_vec(),
            }),
            _ => Err(EngineError::MissingEndpoint {
                function: format!("{function} (incomplete TLS material)"),
            }),
        }
    }
}
