//! Test utilities for the weft engine.
//!
//! [`FakeFunctions`] stands in for the gRPC transport: tests script one
//! response per invocation, keyed by the request's step tag, and can inspect
//! every request a pipeline sent. [`ResponseBuilder`] assembles wire
//! responses without hand-rolling prost structs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tonic::{Code, Status};
use weft_api::{DynamicObject, ObjectMeta};
use weft_fn::{FunctionEndpoint, FunctionTransport};
use weft_proto::v1::{
    self, Condition, ConditionStatus, Ready, RequestMeta, Requirements, Resource,
    ResourceSelector, ResponseMeta, RunFunctionRequest, RunFunctionResponse, SelectorMatch,
    Severity, Target,
};

enum Scripted {
    Ok(RunFunctionResponse),
    /// Respond with the request's observed state as desired.
    Echo,
    Err(Code, String),
}

/// A scripted function transport.
///
/// Responses are consumed per call, keyed by the request's `meta.tag` (the
/// pipeline sets it to the step name). `always` installs a sticky fallback
/// used when the per-call queue is empty.
#[derive(Default)]
pub struct FakeFunctions {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sticky: Mutex<HashMap<String, RunFunctionResponse>>,
    requests: Mutex<Vec<RunFunctionRequest>>,
}

impl FakeFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for the next call tagged `tag`.
    pub fn script(&self, tag: &str, response: RunFunctionResponse) {
        self.scripts
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_default()
            .push_back(Scripted::Ok(response));
    }

    /// Queue an echo: the call answers with its own observed state as
    /// desired.
    pub fn script_echo(&self, tag: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_default()
            .push_back(Scripted::Echo);
    }

    /// Queue a transport error.
    pub fn script_error(&self, tag: &str, code: Code, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_default()
            .push_back(Scripted::Err(code, message.to_string()));
    }

    /// Install a sticky response served whenever the queue for `tag` is
    /// empty.
    pub fn always(&self, tag: &str, response: RunFunctionResponse) {
        self.sticky
            .lock()
            .unwrap()
            .insert(tag.to_string(), response);
    }

    /// Every request observed so far, in call order.
    pub fn requests(&self) -> Vec<RunFunctionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// How many calls carried `tag`.
    pub fn calls(&self, tag: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.meta.as_ref().map(|m| m.tag.as_str()) == Some(tag))
            .count()
    }
}

#[async_trait]
impl FunctionTransport for FakeFunctions {
    async fn run(
        &self,
        _endpoint: &FunctionEndpoint,
        request: RunFunctionRequest,
        _timeout: Duration,
    ) -> Result<RunFunctionResponse, Status> {
        let tag = request
            .meta
            .as_ref()
            .map(|m| m.tag.clone())
            .unwrap_or_default();
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self.scripts.lock().unwrap().get_mut(&tag).and_then(VecDeque::pop_front);
        match scripted {
            Some(Scripted::Ok(response)) => Ok(response),
            Some(Scripted::Echo) => Ok(RunFunctionResponse {
                desired: request.observed,
                context: request.context,
                ..Default::default()
            }),
            Some(Scripted::Err(code, message)) => Err(Status::new(code, message)),
            None => match self.sticky.lock().unwrap().get(&tag) {
                Some(response) => Ok(response.clone()),
                None => Err(Status::internal(format!(
                    "no scripted response for step {tag}"
                ))),
            },
        }
    }
}

/// Fluent builder for wire responses.
#[derive(Default)]
pub struct ResponseBuilder {
    response: RunFunctionResponse,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the desired composite from a JSON body.
    pub fn desired_composite(mut self, body: &Value) -> Self {
        let state = self.response.desired.get_or_insert_with(Default::default);
        state.composite = Some(Resource {
            resource: serde_json::to_vec(body).expect("JSON values serialize"),
            ..Default::default()
        });
        self
    }

    /// Add a desired composed resource from a JSON body.
    pub fn desired_resource(mut self, name: &str, body: &Value) -> Self {
        let state = self.response.desired.get_or_insert_with(Default::default);
        state.resources.insert(
            name.to_string(),
            Resource {
                resource: serde_json::to_vec(body).expect("JSON values serialize"),
                ..Default::default()
            },
        );
        self
    }

    /// Assert readiness for a desired composed resource.
    pub fn ready(mut self, name: &str, ready: bool) -> Self {
        let state = self.response.desired.get_or_insert_with(Default::default);
        if let Some(resource) = state.resources.get_mut(name) {
            resource.ready = (if ready { Ready::True } else { Ready::False }) as i32;
        }
        self
    }

    /// Add connection details to the desired composite.
    pub fn composite_connection(mut self, key: &str, value: &[u8]) -> Self {
        let state = self.response.desired.get_or_insert_with(Default::default);
        let composite = state.composite.get_or_insert_with(Default::default);
        composite
            .connection_details
            .insert(key.to_string(), value.to_vec());
        self
    }

    pub fn fatal(self, message: &str) -> Self {
        self.result(Severity::Fatal, message)
    }

    pub fn warning(self, message: &str) -> Self {
        self.result(Severity::Warning, message)
    }

    pub fn normal(self, message: &str) -> Self {
        self.result(Severity::Normal, message)
    }

    fn result(mut self, severity: Severity, message: &str) -> Self {
        self.response.results.push(v1::Result {
            severity: severity as i32,
            message: message.to_string(),
            target: Target::Composite as i32,
            reason: String::new(),
        });
        self
    }

    pub fn condition(mut self, type_: &str, status: ConditionStatus, target: Target) -> Self {
        self.response.conditions.push(Condition {
            r#type: type_.to_string(),
            status: status as i32,
            reason: "FromFunction".to_string(),
            message: String::new(),
            target: target as i32,
        });
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        let meta = self.response.meta.get_or_insert_with(|| ResponseMeta {
            tag: String::new(),
            ttl: None,
        });
        meta.ttl = Some(prost_types_duration(ttl));
        self
    }

    /// Require an extra resource by name.
    pub fn require_by_name(mut self, requirement: &str, api_version: &str, kind: &str, name: &str) -> Self {
        let requirements = self
            .response
            .requirements
            .get_or_insert_with(Requirements::default);
        requirements.extra_resources.insert(
            requirement.to_string(),
            ResourceSelector {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                r#match: Some(SelectorMatch::MatchName(name.to_string())),
            },
        );
        self
    }

    /// Round-trip the given context entries back (functions must return the
    /// context they want preserved).
    pub fn context(mut self, key: &str, value: &[u8]) -> Self {
        self.response.context.insert(key.to_string(), value.to_vec());
        self
    }

    pub fn build(self) -> RunFunctionResponse {
        self.response
    }
}

fn prost_types_duration(d: Duration) -> weft_proto::prost_types::Duration {
    weft_proto::prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

/// A bare composite of the given type.
pub fn composite(api_version: &str, kind: &str, name: &str) -> DynamicObject {
    DynamicObject::new(api_version, kind).named(name)
}

/// A namespaced claim of the given type.
pub fn claim(api_version: &str, kind: &str, namespace: &str, name: &str) -> DynamicObject {
    DynamicObject::new(api_version, kind)
        .named(name)
        .in_namespace(namespace)
}

/// An Active function revision exposing a plaintext endpoint, the shape the
/// runtime hook publishes for a running function package.
pub fn active_function_revision(function: &str, endpoint: &str) -> weft_api::FunctionRevision {
    weft_api::FunctionRevision {
        api_version: weft_api::package::PKG_API_VERSION.to_string(),
        kind: weft_api::package::FUNCTION_REVISION_KIND.to_string(),
        metadata: ObjectMeta {
            name: Some(format!("{function}-test1")),
            ..ObjectMeta::default()
        },
        spec: weft_api::FunctionRevisionSpec {
            desired_state: weft_api::PackageRevisionDesiredState::Active,
            image: format!("registry.example/{function}@sha256:test"),
            revision: 1,
            tls_server_secret_name: None,
            runtime_config_ref: None,
        },
        status: weft_api::FunctionRevisionStatus {
            endpoint: Some(endpoint.to_string()),
            conditions: vec![],
        },
    }
}
