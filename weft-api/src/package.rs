//! Package revisions: immutable snapshots of function and provider packages.
//!
//! The runtime hook watches these and brings a gRPC endpoint into existence
//! (Deployment + Service + TLS) for every active revision.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::object::{ObjectMeta, TypeRef};
use crate::workload::{EnvVar, Volume, VolumeMount};

pub const PKG_API_VERSION: &str = "pkg.crossplane.io/v1";
pub const FUNCTION_REVISION_KIND: &str = "FunctionRevision";
pub const PROVIDER_REVISION_KIND: &str = "ProviderRevision";
pub const RUNTIME_CONFIG_KIND: &str = "DeploymentRuntimeConfig";
pub const LOCK_KIND: &str = "Lock";

/// Whether a revision should have a running runtime.
///
/// At most one revision of a given parent package is `Active` at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageRevisionDesiredState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRevisionSpec {
    pub desired_state: PackageRevisionDesiredState,
    /// Source image at a specific digest.
    pub image: String,
    /// Creation-order index within the parent package.
    pub revision: i64,
    /// Secret the runtime writes the function's server certificate into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_server_secret_name: Option<String>,
    /// Optional runtime config with deployment overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config_ref: Option<RuntimeConfigRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfigRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRevisionStatus {
    /// `host:port` the pipeline dials to run this function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Snapshot of a function package at a specific image digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRevision {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: FunctionRevisionSpec,
    #[serde(default)]
    pub status: FunctionRevisionStatus,
}

impl FunctionRevision {
    pub fn type_ref() -> TypeRef {
        TypeRef::new(PKG_API_VERSION, FUNCTION_REVISION_KIND)
    }

    /// Name of the parent package, by convention the revision name minus its
    /// trailing hash segment.
    pub fn package_name(&self) -> String {
        let name = self.metadata.name.clone().unwrap_or_default();
        match name.rfind('-') {
            Some(idx) => name[..idx].to_string(),
            None => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRevisionSpec {
    pub desired_state: PackageRevisionDesiredState,
    pub image: String,
    pub revision: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_server_secret_name: Option<String>,
    /// Providers additionally hold a client certificate for webhook calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config_ref: Option<RuntimeConfigRef>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRevisionStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Snapshot of a provider package at a specific image digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRevision {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ProviderRevisionSpec,
    #[serde(default)]
    pub status: ProviderRevisionStatus,
}

impl ProviderRevision {
    pub fn type_ref() -> TypeRef {
        TypeRef::new(PKG_API_VERSION, PROVIDER_REVISION_KIND)
    }

    pub fn package_name(&self) -> String {
        let name = self.metadata.name.clone().unwrap_or_default();
        match name.rfind('-') {
            Some(idx) => name[..idx].to_string(),
            None => name,
        }
    }
}

/// Deployment overrides a package author or operator may declare.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub labels: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RuntimeConfigSpec,
}

impl RuntimeConfig {
    pub fn type_ref() -> TypeRef {
        TypeRef::new(PKG_API_VERSION, RUNTIME_CONFIG_KIND)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockPackage {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: String,
    pub version: String,
}

/// Process-wide singleton recording installed packages. The runtime hook
/// only watches it; dependency resolution happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<LockPackage>,
}

impl Lock {
    pub fn type_ref() -> TypeRef {
        TypeRef::new(PKG_API_VERSION, LOCK_KIND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_name_strips_revision_hash() {
        let revision = FunctionRevision {
            api_version: PKG_API_VERSION.to_string(),
            kind: FUNCTION_REVISION_KIND.to_string(),
            metadata: ObjectMeta {
                name: Some("function-render-9fa3c2".to_string()),
                ..ObjectMeta::default()
            },
            spec: FunctionRevisionSpec {
                desired_state: PackageRevisionDesiredState::Active,
                image: "registry.example/function-render@sha256:abc".to_string(),
                revision: 1,
                tls_server_secret_name: None,
                runtime_config_ref: None,
            },
            status: FunctionRevisionStatus::default(),
        };
        assert_eq!(revision.package_name(), "function-render");
    }

    #[test]
    fn desired_state_serializes_as_pascal_case() {
        let value = serde_json::to_value(PackageRevisionDesiredState::Active).unwrap();
        assert_eq!(value, "Active");
    }
}
