//! Environment configs: cluster-scoped key-value documents merged into the
//! pipeline context under the engine-owned `environment` key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::object::{ObjectMeta, TypeRef};

pub const ENVIRONMENT_API_VERSION: &str = "apiextensions.crossplane.io/v1beta1";
pub const ENVIRONMENT_KIND: &str = "EnvironmentConfig";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EnvironmentConfig {
    pub fn type_ref() -> TypeRef {
        TypeRef::new(ENVIRONMENT_API_VERSION, ENVIRONMENT_KIND)
    }

    pub fn new(name: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            api_version: ENVIRONMENT_API_VERSION.to_string(),
            kind: ENVIRONMENT_KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..ObjectMeta::default()
            },
            data,
        }
    }
}
