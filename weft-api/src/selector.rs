//! Resource selectors, as declared by functions requiring extra resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::object::TypeRef;

/// How a selector matches objects of its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceMatch {
    /// Match exactly the object with this name: yields zero or one results.
    Name(String),
    /// Match every object carrying all of these labels: yields zero or more.
    Labels(BTreeMap<String, String>),
}

/// A function's requirement for extra live resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(flatten)]
    pub matcher: ResourceMatch,
}

impl ResourceSelector {
    pub fn by_name(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            matcher: ResourceMatch::Name(name.into()),
        }
    }

    pub fn by_labels(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            matcher: ResourceMatch::Labels(labels),
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::new(self.api_version.clone(), self.kind.clone())
    }
}
