//! Store error taxonomy.

use weft_api::ObjectKey;

/// Errors surfaced by object store operations.
///
/// `NotFound` and `Conflict` are part of normal reconcile control flow;
/// everything else is either a caller bug (`Invalid`, `AlreadyExists` on a
/// name the caller computed) or a transport fault to retry next reconcile.
#[derive(Debug)]
pub enum StoreError {
    /// The requested object does not exist.
    NotFound(ObjectKey),
    /// A create hit an existing object with the same key.
    AlreadyExists(ObjectKey),
    /// An optimistic-concurrency write lost the race.
    Conflict { key: ObjectKey, message: String },
    /// The object violates a schema constraint (e.g. an immutable field).
    Invalid { message: String },
    /// The transport to the store failed; retry next reconcile.
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Whether the write failed because a declared-immutable field changed.
    pub fn is_immutable(&self) -> bool {
        matches!(self, StoreError::Invalid { message } if message.contains("immutable"))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "Not found: {key}"),
            StoreError::AlreadyExists(key) => write!(f, "Already exists: {key}"),
            StoreError::Conflict { key, message } => write!(f, "Conflict on {key}: {message}"),
            StoreError::Invalid { message } => write!(f, "Invalid object: {message}"),
            StoreError::Transport(msg) => write!(f, "Store transport error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
