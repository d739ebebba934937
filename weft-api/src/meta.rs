//! Well-known label, annotation, finalizer and context keys.
//!
//! These strings are wire/storage contracts shared with functions and
//! provider packages; changing any of them is a breaking change.

/// Label on composed resources: name of the owning composite.
pub const LABEL_COMPOSITE: &str = "crossplane.io/composite";

/// Label on composed resources: UID of the owning composite.
pub const LABEL_COMPOSITE_UID: &str = "crossplane.io/composite-uid";

/// Label on composed resources: the resource's name within its composition.
pub const LABEL_RESOURCE_NAME: &str = "crossplane.io/composition-resource-name";

/// Label on composed resources: the pinned composition revision.
pub const LABEL_REVISION: &str = "crossplane.io/composition-revision";

/// Label on composition revisions: name of the parent composition.
pub const LABEL_COMPOSITION_NAME: &str = "crossplane.io/composition-name";

/// Labels recorded on composites bound to a claim.
pub const LABEL_CLAIM_NAME: &str = "crossplane.io/claim-name";
pub const LABEL_CLAIM_NAMESPACE: &str = "crossplane.io/claim-namespace";

/// Annotation carrying the serialized desired state of the last apply, used
/// for three-way merges.
pub const ANNOTATION_LAST_APPLIED: &str = "crossplane.io/last-applied-configuration";

/// Annotation on composition revisions carrying the parent spec hash.
pub const ANNOTATION_SPEC_HASH: &str = "crossplane.io/composition-spec-hash";

/// Finalizer protecting a claim until its composite is released or gone.
pub const FINALIZER_CLAIM: &str = "apiextensions.crossplane.io/claim-protection";

/// Finalizer protecting a composite until its composed resources are handled.
pub const FINALIZER_COMPOSITE: &str = "apiextensions.crossplane.io/composite-protection";

/// The one pipeline context key owned by the engine. All other context
/// entries belong to functions and round-trip untouched.
pub const CONTEXT_KEY_ENVIRONMENT: &str = "apiextensions.crossplane.io/environment";

/// Name of the secret holding the root certificate authority.
pub const ROOT_CA_SECRET_NAME: &str = "crossplane-root-ca";

/// Suffixes of the per-package TLS secrets.
pub const TLS_SERVER_SECRET_SUFFIX: &str = "-tls-server";
pub const TLS_CLIENT_SECRET_SUFFIX: &str = "-tls-client";

/// Secret holding the engine's own client certificate, presented when
/// dialing function endpoints over mutual TLS.
pub const ENGINE_TLS_CLIENT_SECRET_NAME: &str = "crossplane-tls-client";

/// Annotation selecting the per-resource delete policy. Absent means
/// `Delete`; `Orphan` leaves the object behind when its slot disappears.
pub const ANNOTATION_DELETE_POLICY: &str = "crossplane.io/delete-policy";
pub const DELETE_POLICY_ORPHAN: &str = "Orphan";

/// Keys within TLS secrets.
pub const SECRET_KEY_TLS_CERT: &str = "tls.crt";
pub const SECRET_KEY_TLS_KEY: &str = "tls.key";
pub const SECRET_KEY_CA_CERT: &str = "ca.crt";

/// Immutable deployment selector label keying a package revision's pods.
pub const LABEL_PACKAGE_REVISION: &str = "pkg-revision";

/// Debug overrides for the package manager runtime, the only environment
/// variables the engine reads directly.
pub const ENV_PACKAGE_MANAGER_IMAGE: &str = "PACKAGE_MANAGER_IMAGE";
pub const ENV_PACKAGE_MANAGER_IMAGE_PULL_POLICY: &str = "PACKAGE_MANAGER_IMAGEPULLPOLICY";
