//! Store-backed event recorder.
//!
//! Events are plain stored objects referencing the object they concern.
//! Recording is best-effort: a failed write is logged and dropped, never
//! surfaced into reconcile control flow.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;
use weft_api::{DynamicObject, TypeRef};

use crate::store::ObjectStore;

pub const EVENT_API_VERSION: &str = "v1";
pub const EVENT_KIND: &str = "Event";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    fn as_str(self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

#[derive(Clone)]
pub struct EventRecorder {
    store: Arc<dyn ObjectStore>,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn event_type_ref() -> TypeRef {
        TypeRef::new(EVENT_API_VERSION, EVENT_KIND)
    }

    /// Record one event about `regarding`.
    pub async fn record(
        &self,
        regarding: &DynamicObject,
        type_: EventType,
        reason: &str,
        message: &str,
    ) {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();
        let mut event = DynamicObject::new(EVENT_API_VERSION, EVENT_KIND)
            .named(format!("{}.{suffix}", regarding.name()));
        event.metadata.namespace = regarding.metadata.namespace.clone();
        event.set_value_at("type", json!(type_.as_str()));
        event.set_value_at("reason", json!(reason));
        event.set_value_at("message", json!(message));
        event.set_value_at(
            "involvedObject",
            serde_json::to_value(regarding.typed_ref()).expect("refs serialize to JSON"),
        );

        if let Err(err) = self.store.create(&event).await {
            tracing::warn!(
                object = %regarding.name(),
                reason,
                error = %err,
                "Failed to record event"
            );
        }
    }
}
