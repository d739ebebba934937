//! Workload manifests for package runtimes.

use std::collections::BTreeMap;

use weft_api::meta::{
    ENV_PACKAGE_MANAGER_IMAGE, ENV_PACKAGE_MANAGER_IMAGE_PULL_POLICY, LABEL_PACKAGE_REVISION,
};
use weft_api::{
    Container, ContainerPort, Deployment, DeploymentSpec, LabelSelector, ObjectMeta, PodSpec,
    PodTemplateSpec, RuntimeConfigSpec, SecretVolumeSource, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};

/// Container port every function serves gRPC on.
pub const GRPC_PORT: i32 = 9443;
/// Additional port provider runtimes expose for webhooks.
pub const WEBHOOK_PORT: i32 = 9444;

const SERVER_CERTS_VOLUME: &str = "tls-server-certs";
const CLIENT_CERTS_VOLUME: &str = "tls-client-certs";

/// Resolve a package image reference, prefixing the default registry when
/// the reference names none.
pub fn resolve_image(image: &str, default_registry: &str) -> String {
    let first_segment = image.split('/').next().unwrap_or_default();
    let has_registry = first_segment.contains('.') || first_segment.contains(':');
    if has_registry {
        image.to_string()
    } else {
        format!("{default_registry}/{image}")
    }
}

/// Builds the workload objects for one revision.
pub struct RuntimeManifests {
    pub namespace: String,
    pub default_registry: String,
}

impl RuntimeManifests {
    pub fn new(namespace: impl Into<String>, default_registry: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            default_registry: default_registry.into(),
        }
    }

    /// The per-package headless service, re-pointed at the active revision's
    /// pods on every activation.
    pub fn service(&self, package: &str, revision: &str, ports: &[i32]) -> Service {
        let mut selector = BTreeMap::new();
        selector.insert(LABEL_PACKAGE_REVISION.to_string(), revision.to_string());
        Service {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata: ObjectMeta {
                name: Some(package.to_string()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector,
                ports: ports
                    .iter()
                    .map(|port| ServicePort {
                        name: None,
                        port: *port,
                        target_port: Some(*port),
                    })
                    .collect(),
            },
        }
    }

    pub fn service_account(&self, name: &str) -> ServiceAccount {
        ServiceAccount {
            api_version: "v1".to_string(),
            kind: "ServiceAccount".to_string(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
        }
    }

    /// The per-revision deployment. The selector is immutable by schema;
    /// the revision name keys it.
    #[allow(clippy::too_many_arguments)]
    pub fn deployment(
        &self,
        revision: &str,
        image: &str,
        overrides: &RuntimeConfigSpec,
        server_secret: &str,
        client_secret: Option<&str>,
        extra_ports: &[i32],
    ) -> Deployment {
        let mut image = resolve_image(
            overrides.image.as_deref().unwrap_or(image),
            &self.default_registry,
        );
        let mut image_pull_policy = None;
        // Debug overrides for developing the package manager itself; the
        // only environment variables read directly.
        if let Ok(debug_image) = std::env::var(ENV_PACKAGE_MANAGER_IMAGE) {
            image = debug_image;
        }
        if let Ok(policy) = std::env::var(ENV_PACKAGE_MANAGER_IMAGE_PULL_POLICY) {
            image_pull_policy = Some(policy);
        }

        let mut labels = overrides.labels.clone();
        labels.insert(LABEL_PACKAGE_REVISION.to_string(), revision.to_string());
        let mut selector_labels = BTreeMap::new();
        selector_labels.insert(LABEL_PACKAGE_REVISION.to_string(), revision.to_string());

        let mut ports = vec![ContainerPort {
            name: Some("grpc".to_string()),
            container_port: GRPC_PORT,
        }];
        for port in extra_ports {
            ports.push(ContainerPort {
                name: None,
                container_port: *port,
            });
        }

        let mut volumes = vec![Volume {
            name: SERVER_CERTS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: server_secret.to_string(),
            }),
        }];
        let mut mounts = vec![VolumeMount {
            name: SERVER_CERTS_VOLUME.to_string(),
            mount_path: "/tls/server".to_string(),
            read_only: Some(true),
        }];
        if let Some(client_secret) = client_secret {
            volumes.push(Volume {
                name: CLIENT_CERTS_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: client_secret.to_string(),
                }),
            });
            mounts.push(VolumeMount {
                name: CLIENT_CERTS_VOLUME.to_string(),
                mount_path: "/tls/client".to_string(),
                read_only: Some(true),
            });
        }
        volumes.extend(overrides.volumes.iter().cloned());
        mounts.extend(overrides.volume_mounts.iter().cloned());

        Deployment {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            metadata: ObjectMeta {
                name: Some(revision.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: labels.clone(),
                ..ObjectMeta::default()
            },
            spec: DeploymentSpec {
                replicas: Some(overrides.replicas.unwrap_or(1)),
                selector: LabelSelector {
                    match_labels: selector_labels,
                },
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels,
                        ..ObjectMeta::default()
                    },
                    spec: PodSpec {
                        service_account_name: overrides.service_account_name.clone(),
                        containers: vec![Container {
                            name: "package-runtime".to_string(),
                            image,
                            image_pull_policy,
                            ports,
                            env: overrides.env.clone(),
                            volume_mounts: mounts,
                        }],
                        volumes,
                    },
                },
            },
        }
    }

    /// The DNS names a package's server certificate must cover.
    pub fn service_dns_names(&self, package: &str) -> Vec<String> {
        vec![
            format!("{package}.{}.svc", self.namespace),
            format!("{package}.{}.svc.cluster.local", self.namespace),
        ]
    }

    /// The endpoint the pipeline dials for this package.
    pub fn endpoint(&self, package: &str) -> String {
        format!("{package}.{}.svc:{GRPC_PORT}", self.namespace)
    }
}
