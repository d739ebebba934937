//! Compositions and their immutable revisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::ConditionStatus;
use crate::object::{ObjectMeta, TypeRef};

pub const COMPOSITION_API_VERSION: &str = "apiextensions.crossplane.io/v1";
pub const COMPOSITION_KIND: &str = "Composition";
pub const COMPOSITION_REVISION_KIND: &str = "CompositionRevision";

/// How a composition describes its composed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositionMode {
    /// An ordered pipeline of composition functions. The only mode the
    /// engine runs natively.
    Pipeline,
    /// Deprecated inline resource templates. Served by wrapping the
    /// templates in a single pipeline step; never modeled natively.
    Resources,
}

impl Default for CompositionMode {
    fn default() -> Self {
        CompositionMode::Pipeline
    }
}

/// A credential source a pipeline step wants mounted into its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCredentials {
    /// Name under which the credentials are handed to the function.
    pub name: String,
    /// The secret holding the credential data.
    pub secret_ref: CredentialSecretRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSecretRef {
    pub name: String,
    pub namespace: String,
}

/// One step of a composition pipeline. Ordering is positional and stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    /// Step name, unique within the composition.
    pub step: String,
    /// Logical name of the function package serving this step.
    pub function_ref: FunctionRef,
    /// Opaque per-step input, forwarded to the function untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<FunctionCredentials>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
}

/// Reference to an environment config merged into the pipeline context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSourceRef {
    pub name: String,
}

/// The kinds of readiness checks a composition may declare per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessCheckType {
    NonEmpty,
    MatchString,
    MatchInteger,
    MatchCondition,
    MatchTrue,
    MatchFalse,
    MatchFieldValue,
}

/// A declarative rule mapping a composed object's fields to a Ready signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessCheck {
    #[serde(rename = "type")]
    pub type_: ReadinessCheckType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_integer: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_condition: Option<MatchConditionSpec>,
    /// Expected value for `MatchFieldValue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_field_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConditionSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
}

/// Maps a key of a composed resource's connection secret into the composite's
/// connection secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetailMapping {
    /// Key written into the composite's connection secret.
    pub name: String,
    /// Resource name within the composition to harvest from.
    pub from_resource: String,
    /// Key read from that resource's connection secret.
    pub from_connection_secret_key: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    /// The composite type this composition can satisfy.
    pub composite_type_ref: TypeRef,
    #[serde(default)]
    pub mode: CompositionMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<PipelineStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_configs: Vec<EnvironmentSourceRef>,
    /// Per-resource readiness checks, keyed by resource name within the
    /// composition. Resources without an entry use the standard Ready
    /// condition (or the function's explicit ready flag).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub readiness_checks: BTreeMap<String, Vec<ReadinessCheck>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_details: Vec<ConnectionDetailMapping>,
}

/// A user-declared recipe for composing resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CompositionSpec,
}

impl Composition {
    pub fn type_ref() -> TypeRef {
        TypeRef::new(COMPOSITION_API_VERSION, COMPOSITION_KIND)
    }

    pub fn new(name: impl Into<String>, spec: CompositionSpec) -> Self {
        Self {
            api_version: COMPOSITION_API_VERSION.to_string(),
            kind: COMPOSITION_KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..ObjectMeta::default()
            },
            spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRevisionSpec {
    /// Monotonically increasing revision number within the parent
    /// composition, starting at 1.
    pub revision: i64,
    /// Immutable copy of the parent composition's spec at snapshot time.
    #[serde(flatten)]
    pub composition: CompositionSpec,
}

/// An immutable snapshot of a composition: one revision per observed spec
/// hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRevision {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CompositionRevisionSpec,
}

impl CompositionRevision {
    pub fn type_ref() -> TypeRef {
        TypeRef::new(COMPOSITION_API_VERSION, COMPOSITION_REVISION_KIND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pipeline_step_serializes_with_wire_names() {
        let step = PipelineStep {
            step: "render".to_string(),
            function_ref: FunctionRef {
                name: "function-render".to_string(),
            },
            input: Some(json!({ "replicas": 3 })),
            credentials: vec![],
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["step"], "render");
        assert_eq!(value["functionRef"]["name"], "function-render");
        assert_eq!(value["input"]["replicas"], 3);
    }

    #[test]
    fn composition_round_trips_through_dynamic() {
        let composition = Composition::new(
            "db-composition",
            CompositionSpec {
                composite_type_ref: TypeRef::new("example.org/v1", "XDatabase"),
                mode: CompositionMode::Pipeline,
                pipeline: vec![PipelineStep {
                    step: "render".to_string(),
                    function_ref: FunctionRef {
                        name: "function-render".to_string(),
                    },
                    input: None,
                    credentials: vec![],
                }],
                ..CompositionSpec::default()
            },
        );
        let dynamic = crate::object::to_dynamic(&composition);
        assert_eq!(dynamic.kind, COMPOSITION_KIND);
        let back: Composition = dynamic
            .try_into_typed(&Composition::type_ref())
            .unwrap();
        assert_eq!(back, composition);
    }

    #[test]
    fn mode_defaults_to_pipeline() {
        let spec: CompositionSpec = serde_json::from_value(json!({
            "compositeTypeRef": { "apiVersion": "example.org/v1", "kind": "XDatabase" }
        }))
        .unwrap();
        assert_eq!(spec.mode, CompositionMode::Pipeline);
    }
}
