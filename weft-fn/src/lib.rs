//! Function invocation.
//!
//! Three layers, outermost first:
//!
//! - [`StabilizingRunner`] re-invokes one function until its extra-resource
//!   requirements reach a fixed point (or a hard cap).
//! - [`ExtraResourcesFetcher`] resolves requirement selectors into live
//!   objects through the object store.
//! - [`FunctionRunner`] makes a single gRPC call with a deadline, TLS
//!   selection and RED metrics.

pub mod error;
pub mod fetch;
pub mod metrics;
pub mod runner;
pub mod stabilize;

pub use error::FunctionError;
pub use fetch::ExtraResourcesFetcher;
pub use runner::{
    ClientTlsBundle, FunctionEndpoint, FunctionRunner, FunctionTransport, GrpcTransport,
    RunnerConfig,
};
pub use stabilize::{StabilizingRunner, MAX_REQUIREMENTS_ITERATIONS};
