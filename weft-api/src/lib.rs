//! Object model for the weft composition engine.
//!
//! Everything the engine persists or observes is a [`DynamicObject`]: a
//! schemaless body with typed common metadata. Engine-owned kinds
//! (compositions, revisions, package revisions, workloads) are typed serde
//! structs that convert to and from the dynamic representation; user-defined
//! kinds (composites, claims, composed resources) stay dynamic and are
//! accessed through thin typed wrappers.

pub mod claim;
pub mod composite;
pub mod composition;
pub mod condition;
pub mod environment;
pub mod meta;
pub mod object;
pub mod package;
pub mod selector;
pub mod workload;

pub use claim::{Claim, CompositeDeletePolicy};
pub use composite::{Composite, CompositionUpdatePolicy, SecretRef};
pub use composition::{
    Composition, CompositionMode, CompositionRevision, CompositionRevisionSpec, CompositionSpec,
    ConnectionDetailMapping, CredentialSecretRef, EnvironmentSourceRef, FunctionCredentials,
    FunctionRef, MatchConditionSpec, PipelineStep, ReadinessCheck, ReadinessCheckType,
};
pub use condition::{get_condition, set_condition, Condition, ConditionStatus};
pub use environment::EnvironmentConfig;
pub use object::{
    to_dynamic, ByteString, ControllerConflict, ConvertError, DynamicObject, ObjectKey,
    ObjectMeta, OwnerReference, TypeRef, TypedRef,
};
pub use package::{
    FunctionRevision, FunctionRevisionSpec, FunctionRevisionStatus, Lock, LockPackage,
    PackageRevisionDesiredState, ProviderRevision, ProviderRevisionSpec, ProviderRevisionStatus,
    RuntimeConfig, RuntimeConfigRef, RuntimeConfigSpec,
};
pub use selector::{ResourceMatch, ResourceSelector};
pub use workload::{
    Container, ContainerPort, Deployment, DeploymentSpec, EnvVar, LabelSelector, PodSpec,
    PodTemplateSpec, Secret, SecretVolumeSource, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
