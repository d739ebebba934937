//! Version 1 of the function runner protocol.
//!
//! Messages are declared with prost derives; the client and server are
//! hand-rolled over tonic's unary machinery so no code generation step is
//! involved. Field tags are a published contract and must never be reused.

use std::collections::HashMap;
use std::sync::Arc;

use prost::{Enumeration, Message, Oneof};
use tonic::client::Grpc as GrpcClient;
use tonic::codec::ProstCodec;
use tonic::codegen::{http, Body, BoxFuture, Context, Poll, Service, StdError};
use tonic::server::{Grpc as GrpcServer, NamedService, UnaryService};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, IntoRequest, Request, Response, Status};

/// Full method path of the one call the protocol defines.
pub const RUN_FUNCTION_PATH: &str =
    "/apiextensions.fn.proto.v1.FunctionRunnerService/RunFunction";

/// Fully-qualified service name, as exposed to reflection and routers.
pub const SERVICE_NAME: &str = "apiextensions.fn.proto.v1.FunctionRunnerService";

// ── Enums ─────────────────────────────────────────────────────────────────

/// Readiness a function may assert for a composed resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Ready {
    Unspecified = 0,
    True = 1,
    False = 2,
}

/// Severity of one result in a function response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Severity {
    Unspecified = 0,
    /// Aborts the pipeline; nothing after this step runs.
    Fatal = 1,
    Warning = 2,
    Normal = 3,
}

/// Where a result or condition should be surfaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Target {
    Unspecified = 0,
    Composite = 1,
    CompositeAndClaim = 2,
}

/// Status of a condition a function asks the engine to project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum ConditionStatus {
    Unspecified = 0,
    True = 1,
    False = 2,
    Unknown = 3,
}

// ── Messages ──────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct RequestMeta {
    /// Opaque tag echoed back by the function, correlating request and
    /// response in logs.
    #[prost(string, tag = "1")]
    pub tag: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseMeta {
    #[prost(string, tag = "1")]
    pub tag: String,
    /// Hint for the earliest useful next reconcile.
    #[prost(message, optional, tag = "2")]
    pub ttl: Option<::prost_types::Duration>,
}

/// One observed or desired resource: a JSON-encoded object body plus its
/// connection details and asserted readiness.
#[derive(Clone, PartialEq, Message)]
pub struct Resource {
    /// JSON-encoded object body. The engine never needs a static schema for
    /// composed resources, so bytes round-trip exactly.
    #[prost(bytes = "vec", tag = "1")]
    pub resource: Vec<u8>,
    #[prost(map = "string, bytes", tag = "2")]
    pub connection_details: HashMap<String, Vec<u8>>,
    #[prost(enumeration = "Ready", tag = "3")]
    pub ready: i32,
}

/// The composite plus its composed resources, keyed by the resource's name
/// within the composition.
#[derive(Clone, PartialEq, Message)]
pub struct State {
    #[prost(message, optional, tag = "1")]
    pub composite: Option<Resource>,
    #[prost(map = "string, message", tag = "2")]
    pub resources: HashMap<String, Resource>,
}

/// One result of running a function.
#[derive(Clone, PartialEq, Message)]
pub struct Result {
    #[prost(enumeration = "Severity", tag = "1")]
    pub severity: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(enumeration = "Target", tag = "3")]
    pub target: i32,
    #[prost(string, tag = "4")]
    pub reason: String,
}

/// A condition a function asks the engine to project onto the composite
/// (and optionally the claim).
#[derive(Clone, PartialEq, Message)]
pub struct Condition {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(enumeration = "ConditionStatus", tag = "2")]
    pub status: i32,
    #[prost(string, tag = "3")]
    pub reason: String,
    #[prost(string, tag = "4")]
    pub message: String,
    #[prost(enumeration = "Target", tag = "5")]
    pub target: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct MatchLabels {
    #[prost(map = "string, string", tag = "1")]
    pub labels: HashMap<String, String>,
}

/// How a selector matches objects of its type.
#[derive(Clone, PartialEq, Oneof)]
pub enum SelectorMatch {
    /// Match exactly one object by name: yields zero or one results.
    #[prost(string, tag = "3")]
    MatchName(String),
    /// Match every object carrying all of these labels.
    #[prost(message, tag = "4")]
    MatchLabels(MatchLabels),
}

/// A function's requirement for extra live resources.
#[derive(Clone, PartialEq, Message)]
pub struct ResourceSelector {
    #[prost(string, tag = "1")]
    pub api_version: String,
    #[prost(string, tag = "2")]
    pub kind: String,
    #[prost(oneof = "SelectorMatch", tags = "3, 4")]
    pub r#match: Option<SelectorMatch>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Requirements {
    /// Extra resources the function wants on its next invocation, keyed by a
    /// requirement name of the function's choosing.
    #[prost(map = "string, message", tag = "1")]
    pub extra_resources: HashMap<String, ResourceSelector>,
}

/// The live objects that satisfied one requirement.
#[derive(Clone, PartialEq, Message)]
pub struct Resources {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<Resource>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CredentialData {
    #[prost(map = "string, bytes", tag = "1")]
    pub data: HashMap<String, Vec<u8>>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum CredentialsSource {
    #[prost(message, tag = "1")]
    CredentialData(CredentialData),
}

#[derive(Clone, PartialEq, Message)]
pub struct Credentials {
    #[prost(oneof = "CredentialsSource", tags = "1")]
    pub source: Option<CredentialsSource>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RunFunctionRequest {
    #[prost(message, optional, tag = "1")]
    pub meta: Option<RequestMeta>,
    #[prost(message, optional, tag = "2")]
    pub observed: Option<State>,
    #[prost(message, optional, tag = "3")]
    pub desired: Option<State>,
    /// Opaque pipeline context, threaded through every step byte-for-byte.
    #[prost(map = "string, bytes", tag = "4")]
    pub context: HashMap<String, Vec<u8>>,
    /// The step's opaque input from the composition.
    #[prost(bytes = "vec", tag = "5")]
    pub input: Vec<u8>,
    /// Live objects satisfying the previous response's requirements, keyed
    /// by requirement name.
    #[prost(map = "string, message", tag = "6")]
    pub extra_resources: HashMap<String, Resources>,
    #[prost(map = "string, message", tag = "7")]
    pub credentials: HashMap<String, Credentials>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RunFunctionResponse {
    #[prost(message, optional, tag = "1")]
    pub meta: Option<ResponseMeta>,
    #[prost(message, optional, tag = "2")]
    pub desired: Option<State>,
    #[prost(message, repeated, tag = "3")]
    pub results: Vec<Result>,
    #[prost(map = "string, bytes", tag = "4")]
    pub context: HashMap<String, Vec<u8>>,
    #[prost(message, optional, tag = "5")]
    pub requirements: Option<Requirements>,
    #[prost(message, repeated, tag = "6")]
    pub conditions: Vec<Condition>,
}

impl RunFunctionResponse {
    /// The most severe result in this response, if any. Discriminants order
    /// Fatal < Warning < Normal, so the minimum is the most severe.
    pub fn most_severe(&self) -> Option<Severity> {
        self.results
            .iter()
            .map(Result::severity)
            .filter(|s| *s != Severity::Unspecified)
            .min()
    }

    /// Whether any result is fatal.
    pub fn is_fatal(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.severity() == Severity::Fatal)
    }
}

// ── Client ────────────────────────────────────────────────────────────────

/// Client for a remote endpoint hosting the FunctionRunnerService protocol.
#[derive(Debug, Clone)]
pub struct FunctionRunnerServiceClient {
    client: GrpcClient<Channel>,
}

impl FunctionRunnerServiceClient {
    /// Wrap an already-established channel. The caller decides transport
    /// details (TLS, timeouts) when building the channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            client: GrpcClient::new(channel),
        }
    }

    /// Connect to a plaintext endpoint. Mostly useful in tests; production
    /// callers build a TLS channel and use [`Self::new`].
    pub async fn connect(
        address: impl Into<String>,
    ) -> std::result::Result<Self, tonic::transport::Error> {
        let conn = Endpoint::from_shared(address.into())?.connect().await?;
        Ok(Self::new(conn))
    }

    /// Run one function invocation.
    pub async fn run_function(
        &mut self,
        request: impl IntoRequest<RunFunctionRequest>,
    ) -> std::result::Result<Response<RunFunctionResponse>, Status> {
        if let Err(err) = self.client.ready().await {
            return Err(Status::new(
                Code::Unknown,
                format!("Service was not ready: {err}"),
            ));
        }
        let codec: ProstCodec<_, _> = ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(RUN_FUNCTION_PATH);
        self.client.unary(request.into_request(), path, codec).await
    }
}

// ── Server ────────────────────────────────────────────────────────────────

/// The server side of the protocol, implemented by functions (and by test
/// doubles standing in for them).
#[tonic::async_trait]
pub trait FunctionRunner: Send + Sync + 'static {
    async fn run_function(
        &self,
        request: Request<RunFunctionRequest>,
    ) -> std::result::Result<Response<RunFunctionResponse>, Status>;
}

/// Hosts a [`FunctionRunner`] behind the FunctionRunnerService protocol.
pub struct FunctionRunnerServiceServer<T> {
    service: Arc<T>,
}

impl<T> FunctionRunnerServiceServer<T> {
    pub fn new(service: T) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

// Hand-written so cloning never requires `T: Clone`; the service is shared.
impl<T> Clone for FunctionRunnerServiceServer<T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<T, B> Service<http::Request<B>> for FunctionRunnerServiceServer<T>
where
    T: FunctionRunner,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(
        &mut self,
        _cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        match req.uri().path() {
            RUN_FUNCTION_PATH => {
                struct RunFunctionSvc<T>(Arc<T>);
                impl<T: FunctionRunner> UnaryService<RunFunctionRequest> for RunFunctionSvc<T> {
                    type Response = RunFunctionResponse;
                    type Future = BoxFuture<Response<Self::Response>, Status>;

                    fn call(&mut self, req: Request<RunFunctionRequest>) -> Self::Future {
                        let service = self.0.clone();
                        Box::pin(async move { service.run_function(req).await })
                    }
                }

                let service = self.service.clone();
                Box::pin(async move {
                    let method = RunFunctionSvc(service);
                    let codec: ProstCodec<_, _> = ProstCodec::default();
                    let mut grpc = GrpcServer::new(codec);
                    Ok(grpc.unary(method, req).await)
                })
            }
            _ => Box::pin(async move {
                let mut response = http::Response::new(tonic::body::Body::default());
                let headers = response.headers_mut();
                headers.insert(
                    Status::GRPC_STATUS,
                    (Code::Unimplemented as i32).into(),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    tonic::metadata::GRPC_CONTENT_TYPE,
                );
                Ok(response)
            }),
        }
    }
}

impl<T: FunctionRunner> NamedService for FunctionRunnerServiceServer<T> {
    const NAME: &'static str = SERVICE_NAME;
}
