//! Conversions between wire messages and the engine's object model.

use std::collections::BTreeMap;
use std::time::Duration;

use weft_api::{self as api, DynamicObject};

use crate::v1::{
    Condition, ConditionStatus, MatchLabels, Resource, ResourceSelector, ResponseMeta,
    SelectorMatch,
};

impl Resource {
    /// Wrap an object body for the wire.
    pub fn from_object(obj: &DynamicObject) -> Self {
        Self {
            resource: serde_json::to_vec(obj).expect("objects serialize to JSON"),
            connection_details: Default::default(),
            ready: 0,
        }
    }

    /// Decode the JSON body back into an object.
    pub fn try_to_object(&self) -> Result<DynamicObject, serde_json::Error> {
        serde_json::from_slice(&self.resource)
    }
}

impl ResponseMeta {
    /// The TTL as a std duration; negative or absent TTLs are `None`.
    pub fn ttl_duration(&self) -> Option<Duration> {
        let ttl = self.ttl.as_ref()?;
        if ttl.seconds < 0 || ttl.nanos < 0 {
            return None;
        }
        Some(Duration::new(ttl.seconds as u64, ttl.nanos as u32))
    }
}

impl From<&api::ResourceSelector> for ResourceSelector {
    fn from(selector: &api::ResourceSelector) -> Self {
        let r#match = match &selector.matcher {
            api::ResourceMatch::Name(name) => SelectorMatch::MatchName(name.clone()),
            api::ResourceMatch::Labels(labels) => SelectorMatch::MatchLabels(MatchLabels {
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }),
        };
        Self {
            api_version: selector.api_version.clone(),
            kind: selector.kind.clone(),
            r#match: Some(r#match),
        }
    }
}

impl ResourceSelector {
    /// Lift into the engine's selector type. Selectors without a match arm
    /// are malformed and yield `None`.
    pub fn to_api(&self) -> Option<api::ResourceSelector> {
        let matcher = match self.r#match.as_ref()? {
            SelectorMatch::MatchName(name) => api::ResourceMatch::Name(name.clone()),
            SelectorMatch::MatchLabels(labels) => api::ResourceMatch::Labels(
                labels
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<BTreeMap<_, _>>(),
            ),
        };
        Some(api::ResourceSelector {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            matcher,
        })
    }
}

impl Condition {
    /// Project into a status condition on the composite or claim.
    pub fn to_api(&self) -> api::Condition {
        let status = match self.status() {
            ConditionStatus::True => api::ConditionStatus::True,
            ConditionStatus::False => api::ConditionStatus::False,
            ConditionStatus::Unknown | ConditionStatus::Unspecified => {
                api::ConditionStatus::Unknown
            }
        };
        let mut condition = api::Condition::new(self.r#type.clone(), status, self.reason.clone());
        if !self.message.is_empty() {
            condition = condition.with_message(self.message.clone());
        }
        condition
    }
}
