//! Desired-state materializer.
//!
//! Turns the pipeline's desired resources into concrete composed intents:
//! owner-stamped, labeled and named. Naming rule, in order: an explicit
//! `metadata.name` from the function wins; otherwise `generateName` defers
//! the choice to the store.

use std::collections::{BTreeMap, HashSet};

use weft_api::meta::{
    LABEL_COMPOSITE, LABEL_COMPOSITE_UID, LABEL_RESOURCE_NAME, LABEL_REVISION,
};
use weft_api::{Composite, DynamicObject, OwnerReference};

use crate::error::EngineError;
use crate::pipeline::DesiredComposed;

/// One materialized composed resource, ready to apply.
#[derive(Debug, Clone)]
pub struct ComposedIntent {
    /// The resource's name within the composition.
    pub resource_name: String,
    pub object: DynamicObject,
    /// Readiness the function asserted explicitly, if any.
    pub ready: Option<bool>,
}

/// Materialize the pipeline's desired resources for `xr`.
pub fn materialize(
    xr: &Composite,
    revision_name: &str,
    desired: &BTreeMap<String, DesiredComposed>,
) -> Result<Vec<ComposedIntent>, EngineError> {
    let mut intents = Vec::with_capacity(desired.len());
    let mut claimed: HashSet<(String, String, String)> = HashSet::new();

    for (resource_name, entry) in desired {
        let mut object = entry.object.clone();

        object
            .set_controller_ref(OwnerReference::controller(&xr.0))
            .map_err(|conflict| EngineError::AlreadyOwned {
                key: object.key().unwrap_or_else(|| {
                    weft_api::ObjectKey::cluster(object.type_ref(), resource_name.clone())
                }),
                controller_uid: conflict.existing.uid,
            })?;

        object.set_label(LABEL_COMPOSITE, xr.name());
        object.set_label(LABEL_COMPOSITE_UID, xr.uid());
        object.set_label(LABEL_RESOURCE_NAME, resource_name.clone());
        object.set_label(LABEL_REVISION, revision_name);

        if object.metadata.name.is_none() && object.metadata.generate_name.is_none() {
            object.metadata.generate_name = Some(format!("{}-", xr.name()));
        }

        // Two intents that resolve to the same stored object would fight
        // over one slot; reject the response outright.
        if let Some(name) = &object.metadata.name {
            let identity = (
                object.api_version.clone(),
                object.kind.clone(),
                name.clone(),
            );
            if !claimed.insert(identity) {
                return Err(EngineError::DuplicateComposed {
                    name: resource_name.clone(),
                });
            }
        }

        intents.push(ComposedIntent {
            resource_name: resource_name.clone(),
            object,
            ready: entry.ready,
        });
    }

    Ok(intents)
}
