//! weft — a composition engine for declarative infrastructure.
//!
//! This facade crate re-exports the weft sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use weft::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature      | Default | Crate          |
//! |--------------|---------|----------------|
//! | `engine`     | **yes** | `weft-engine`, `weft-fn`, `weft-proto` |
//! | `runtime`    | **yes** | `weft-runtime` |
//! | `tls`        | via `runtime` | `weft-tls` |
//! | `test-utils` | no      | `weft-test`    |
//! | `full`       | no      | All of the above |

#[cfg(all(feature = "engine", feature = "runtime"))]
pub mod manager;

#[cfg(all(feature = "engine", feature = "runtime"))]
pub use manager::ControllerManager;

pub use weft_api;
pub use weft_core;
pub use weft_store;

#[cfg(feature = "engine")]
pub use weft_engine;

#[cfg(feature = "engine")]
pub use weft_fn;

#[cfg(feature = "engine")]
pub use weft_proto;

#[cfg(feature = "runtime")]
pub use weft_runtime;

#[cfg(feature = "tls")]
pub use weft_tls;

#[cfg(feature = "test-utils")]
pub use weft_test;

pub mod prelude {
    //! Re-exports of the most commonly used weft types.

    pub use weft_api::{
        Claim, Composite, Composition, CompositionRevision, Condition, ConditionStatus,
        DynamicObject, ObjectKey, ObjectMeta, OwnerReference, ResourceSelector, TypeRef,
    };
    pub use weft_core::{Action, Controller, EngineConfig, Reconciler, WeftConfig, WorkQueue};
    pub use weft_store::{InMemoryStore, ObjectStore, StoreError, WatchEvent};

    #[cfg(feature = "engine")]
    pub use weft_engine::{ClaimReconciler, CompositeReconciler, PipelineRunner};

    #[cfg(feature = "engine")]
    pub use weft_fn::{FunctionEndpoint, FunctionRunner, RunnerConfig};

    #[cfg(feature = "runtime")]
    pub use weft_runtime::{FunctionRevisionReconciler, ProviderRevisionReconciler};

    #[cfg(feature = "tls")]
    pub use weft_tls::TlsBootstrap;
}
