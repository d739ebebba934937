//! Package revision runtime hook.
//!
//! Watches function and provider revisions and manages the workloads that
//! host them: a per-package headless Service, per-package TLS secrets, an
//! optional ServiceAccount and a per-revision Deployment. Activation
//! publishes the revision's gRPC endpoint; deactivation tears down only the
//! Deployment (Service and TLS secrets are keyed per package and survive
//! revision churn).

pub mod function;
pub mod manifests;
pub mod provider;

pub use function::FunctionRevisionReconciler;
pub use manifests::{resolve_image, RuntimeManifests, GRPC_PORT, WEBHOOK_PORT};
pub use provider::ProviderRevisionReconciler;
