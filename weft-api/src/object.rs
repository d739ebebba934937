//! Dynamic objects and common metadata.
//!
//! The engine never needs a static schema for the resources it composes; it
//! only relies on the common metadata every stored object carries. Bodies
//! beyond `apiVersion`/`kind`/`metadata` are kept as raw JSON and addressed
//! with dotted field paths.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// An API type: group/version plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TypeRef {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
}

impl TypeRef {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Fully-qualifying key of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub type_ref: TypeRef,
    /// Empty for cluster-scoped objects.
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(type_ref: TypeRef, name: impl Into<String>) -> Self {
        Self {
            type_ref,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(
        type_ref: TypeRef,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            type_ref,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.type_ref, ns, self.name),
            None => write!(f, "{} {}", self.type_ref, self.name),
        }
    }
}

/// A reference to another object, as persisted inside specs and statuses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl TypedRef {
    pub fn to_key(&self) -> ObjectKey {
        ObjectKey {
            type_ref: TypeRef::new(self.api_version.clone(), self.kind.clone()),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// An owner reference recorded on a dependent object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// Build a controller owner reference to `owner`, blocking owner deletion
    /// until the dependent is gone.
    pub fn controller(owner: &DynamicObject) -> Self {
        Self {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.metadata.name.clone().unwrap_or_default(),
            uid: owner.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    pub fn is_controller(&self) -> bool {
        self.controller == Some(true)
    }
}

/// Common metadata carried by every stored object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

/// Error converting a dynamic object into a typed one.
#[derive(Debug)]
pub enum ConvertError {
    /// The object's apiVersion/kind does not match the expected type.
    WrongType { expected: TypeRef, got: TypeRef },
    /// The body failed to deserialize into the typed schema.
    Malformed(String),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::WrongType { expected, got } => {
                write!(f, "Expected {expected}, got {got}")
            }
            ConvertError::Malformed(msg) => write!(f, "Malformed object: {msg}"),
        }
    }
}

impl std::error::Error for ConvertError {}

/// Error recorded when an object already has a different controller.
#[derive(Debug)]
pub struct ControllerConflict {
    /// The controller reference already present on the object.
    pub existing: OwnerReference,
}

impl fmt::Display for ControllerConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Object is already controlled by {} {} (uid {})",
            self.existing.kind, self.existing.name, self.existing.uid
        )
    }
}

impl std::error::Error for ControllerConflict {}

/// A schemaless object: typed common metadata plus an opaque JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Everything else: `spec`, `status`, `data`, ...
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

impl DynamicObject {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta::default(),
            data: serde_json::Map::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::new(self.api_version.clone(), self.kind.clone())
    }

    /// The object's store key. Objects that only carry `generateName` have no
    /// key until the store assigns a name.
    pub fn key(&self) -> Option<ObjectKey> {
        let name = self.metadata.name.clone()?;
        Some(ObjectKey {
            type_ref: self.type_ref(),
            namespace: self.metadata.namespace.clone(),
            name,
        })
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn typed_ref(&self) -> TypedRef {
        TypedRef {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.name().to_string(),
            uid: self.metadata.uid.clone(),
        }
    }

    /// Read the value at a dotted field path, e.g. `"spec.forProvider.region"`.
    pub fn value_at(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write the value at a dotted field path, creating intermediate objects.
    pub fn set_value_at(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = match segments.pop() {
            Some(last) => last,
            None => return,
        };
        if segments.is_empty() {
            self.data.insert(last.to_string(), value);
            return;
        }
        let first = segments.remove(0);
        let mut current = self
            .data
            .entry(first.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        for segment in segments {
            if !current.is_object() {
                *current = Value::Object(serde_json::Map::new());
            }
            current = current
                .as_object_mut()
                .expect("just ensured object")
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        current
            .as_object_mut()
            .expect("just ensured object")
            .insert(last.to_string(), value);
    }

    /// Read and deserialize the value at a dotted field path.
    pub fn get_at<T: serde::de::DeserializeOwned>(&self, path: &str) -> Option<T> {
        serde_json::from_value(self.value_at(path)?.clone()).ok()
    }

    /// The owner reference with `controller=true`, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.metadata
            .owner_references
            .iter()
            .find(|r| r.is_controller())
    }

    /// Record `owner` as this object's controller.
    ///
    /// Replaces an existing reference to the same owner UID; fails if a
    /// different controller is already recorded.
    pub fn set_controller_ref(&mut self, owner: OwnerReference) -> Result<(), ControllerConflict> {
        if let Some(existing) = self.controller_ref() {
            if existing.uid != owner.uid {
                return Err(ControllerConflict {
                    existing: existing.clone(),
                });
            }
        }
        self.metadata
            .owner_references
            .retain(|r| !(r.is_controller() || r.uid == owner.uid));
        self.metadata.owner_references.push(owner);
        Ok(())
    }

    /// Whether `uid` is recorded as this object's controller.
    pub fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller_ref().map(|r| r.uid.as_str()) == Some(uid)
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.labels.insert(key.into(), value.into());
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.annotations.insert(key.into(), value.into());
    }

    /// Whether every entry of `selector` is present in this object's labels.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.metadata.labels.get(k) == Some(v))
    }

    /// Convert into a typed object. The caller supplies the expected type so
    /// mismatches surface as a distinct error instead of a serde failure.
    pub fn try_into_typed<T: serde::de::DeserializeOwned>(
        &self,
        expected: &TypeRef,
    ) -> Result<T, ConvertError> {
        let got = self.type_ref();
        if &got != expected {
            return Err(ConvertError::WrongType {
                expected: expected.clone(),
                got,
            });
        }
        serde_json::to_value(self)
            .and_then(serde_json::from_value)
            .map_err(|e| ConvertError::Malformed(e.to_string()))
    }
}

/// Convert a typed object into its dynamic representation.
///
/// Panics only if the typed object cannot be represented as JSON, which would
/// be a programming error in the typed schema itself.
pub fn to_dynamic<T: Serialize>(typed: &T) -> DynamicObject {
    let value = serde_json::to_value(typed).expect("typed objects serialize to JSON");
    serde_json::from_value(value).expect("typed objects carry apiVersion/kind/metadata")
}

/// Binary secret data, serialized as base64 the way the store expects.
#[derive(Debug, Clone, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct ByteString(pub Vec<u8>);

impl ByteString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl Serialize for ByteString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine as _;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ByteString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::Engine as _;
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(ByteString)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "s3.example/v1",
            "kind": "Bucket",
            "metadata": { "name": "my-bucket", "uid": "uid-1" },
            "spec": { "forProvider": { "region": "us-east-1" } }
        }))
        .unwrap()
    }

    #[test]
    fn round_trips_unknown_fields() {
        let obj = bucket();
        let value = serde_json::to_value(&obj).unwrap();
        assert_eq!(value["spec"]["forProvider"]["region"], "us-east-1");
        let back: DynamicObject = serde_json::from_value(value).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn value_at_walks_nested_paths() {
        let obj = bucket();
        assert_eq!(
            obj.value_at("spec.forProvider.region"),
            Some(&json!("us-east-1"))
        );
        assert_eq!(obj.value_at("spec.missing"), None);
        assert_eq!(obj.value_at("status"), None);
    }

    #[test]
    fn set_value_at_creates_intermediates() {
        let mut obj = bucket();
        obj.set_value_at("status.atProvider.arn", json!("arn:aws:s3:::b"));
        assert_eq!(
            obj.value_at("status.atProvider.arn"),
            Some(&json!("arn:aws:s3:::b"))
        );
    }

    #[test]
    fn controller_ref_conflict_is_rejected() {
        let owner_a = bucket();
        let mut owner_b = bucket();
        owner_b.metadata.uid = Some("uid-2".to_string());

        let mut obj = DynamicObject::new("v1", "ConfigMap").named("cm");
        obj.set_controller_ref(OwnerReference::controller(&owner_a))
            .unwrap();
        let err = obj
            .set_controller_ref(OwnerReference::controller(&owner_b))
            .unwrap_err();
        assert_eq!(err.existing.uid, "uid-1");
    }

    #[test]
    fn replacing_same_controller_is_idempotent() {
        let owner = bucket();
        let mut obj = DynamicObject::new("v1", "ConfigMap").named("cm");
        obj.set_controller_ref(OwnerReference::controller(&owner))
            .unwrap();
        obj.set_controller_ref(OwnerReference::controller(&owner))
            .unwrap();
        assert_eq!(obj.metadata.owner_references.len(), 1);
    }

    #[test]
    fn matches_labels_requires_all_entries() {
        let mut obj = bucket();
        obj.set_label("app", "demo");
        obj.set_label("tier", "storage");

        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "demo".to_string());
        assert!(obj.matches_labels(&selector));

        selector.insert("tier".to_string(), "compute".to_string());
        assert!(!obj.matches_labels(&selector));
    }

    #[test]
    fn byte_string_round_trips_base64() {
        let data = ByteString::from("hello");
        let encoded = serde_json::to_string(&data).unwrap();
        assert_eq!(encoded, "\"aGVsbG8=\"");
        let back: ByteString = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, data);
    }
}
