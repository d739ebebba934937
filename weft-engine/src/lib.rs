//! The composition engine.
//!
//! One reconcile of a composite resource flows through:
//!
//! 1. Resolve and pin the composition revision ([`revision`]).
//! 2. Load observed composed resources and environment ([`environment`]).
//! 3. Drive the function pipeline to a desired state ([`pipeline`]).
//! 4. Materialize composed intents ([`materialize`]).
//! 5. Apply, delete and readiness-check composed resources ([`composed`]),
//!    publishing connection details ([`connection`]).
//! 6. Project status onto the composite, and through the binder ([`claim`])
//!    onto the owning claim.

pub mod claim;
pub mod composed;
pub mod composite;
pub mod connection;
pub mod endpoint;
pub mod environment;
pub mod error;
pub mod materialize;
pub mod pipeline;
pub mod readiness;
pub mod revision;

pub use claim::{claim_key_of, ClaimReconciler, REASON_BIND_ERROR};
pub use composed::{ComposedOutcome, ComposedReconciler};
pub use composite::{
    composite_key_of, CompositeReconciler, REASON_ALREADY_OWNED, REASON_NO_COMPOSED,
    REASON_REQUIREMENTS_UNSTABLE,
};
pub use connection::{publish_composite_secret, publish_secret, read_composed_connection};
pub use endpoint::FunctionEndpointResolver;
pub use environment::resolve_environment;
pub use error::EngineError;
pub use materialize::{materialize, ComposedIntent};
pub use pipeline::{DesiredComposed, PipelineInput, PipelineOutput, PipelineRunner};
pub use readiness::is_ready;
pub use revision::{CompositionReconciler, RevisionManager};
