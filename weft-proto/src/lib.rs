//! Wire contract of the composition function protocol.
//!
//! One service, one call: `FunctionRunnerService/RunFunction`. The engine is
//! always the client; functions host the server. Messages are hand-written
//! prost types kept field-for-field compatible with the published schema, so
//! the workspace builds without a protobuf toolchain.
//!
//! Determinism note: the engine treats identical requests as yielding
//! identical responses within one reconcile. Functions needing randomness
//! must derive it from request fields (e.g. the composite UID).

pub mod convert;
pub mod v1;

pub use v1::{
    Condition, ConditionStatus, Credentials, MatchLabels, Ready, RequestMeta, Requirements,
    Resource, ResourceSelector, Resources, ResponseMeta, Result as FnResult, RunFunctionRequest,
    RunFunctionResponse, Severity, State, Target,
};
pub use v1::{FunctionRunner, FunctionRunnerServiceClient, FunctionRunnerServiceServer};

// Re-export for downstream crates building requests.
pub use prost;
pub use prost_types;
pub use tonic;
