//! Engine error taxonomy.
//!
//! Transient errors bubble out of a reconcile and requeue with backoff.
//! Terminal errors are surfaced onto the object's conditions and requeued on
//! a fixed schedule (or not at all) instead of hot-looping.

use std::time::Duration;

use weft_api::ObjectKey;
use weft_fn::FunctionError;
use weft_proto::v1::Condition;
use weft_store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// A store operation failed; requeue with backoff.
    Store(StoreError),
    /// A function invocation failed (classification inside).
    Function(FunctionError),
    /// A step returned a fatal result: abort the pipeline, surface the
    /// message, requeue at the response's TTL.
    FatalResult {
        step: String,
        message: String,
        ttl: Option<Duration>,
        /// Conditions the fatal response still asked to project.
        conditions: Vec<Condition>,
    },
    /// Two composed intents resolved to the same object identity.
    DuplicateComposed { name: String },
    /// A claimed slot holds an object controlled by someone else.
    AlreadyOwned { key: ObjectKey, controller_uid: String },
    /// The claim and composite disagree about their binding.
    BindConflict { message: String },
    /// The referenced composition does not exist (yet).
    MissingComposition { name: String },
    /// No active revision with an endpoint serves this function.
    MissingEndpoint { function: String },
    /// The pinned revision cannot be decoded; wait for it to change.
    MalformedRevision { name: String, message: String },
    /// A function response body failed to decode.
    MalformedResponse { step: String, message: String },
}

impl EngineError {
    /// Whether the next reconcile should come from backoff rather than a
    /// condition-and-wait.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(err) => !err.is_not_found(),
            EngineError::Function(err) => !err.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Store(err) => write!(f, "{err}"),
            EngineError::Function(err) => write!(f, "{err}"),
            EngineError::FatalResult { step, message, .. } => {
                write!(f, "Pipeline step {step} returned a fatal result: {message}")
            }
            EngineError::DuplicateComposed { name } => {
                write!(f, "Two composed resources resolve to the same object: {name}")
            }
            EngineError::AlreadyOwned { key, controller_uid } => {
                write!(f, "{key} is already controlled by {controller_uid}")
            }
            EngineError::BindConflict { message } => write!(f, "Bind conflict: {message}"),
            EngineError::MissingComposition { name } => {
                write!(f, "Composition {name} does not exist")
            }
            EngineError::MissingEndpoint { function } => {
                write!(f, "No active revision of function {function} exposes an endpoint")
            }
            EngineError::MalformedRevision { name, message } => {
                write!(f, "Composition revision {name} is malformed: {message}")
            }
            EngineError::MalformedResponse { step, message } => {
                write!(f, "Step {step} returned an undecodable response: {message}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(err) => Some(err),
            EngineError::Function(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err)
    }
}

impl From<FunctionError> for EngineError {
    fn from(err: FunctionError) -> Self {
        EngineError::Function(err)
    }
}
