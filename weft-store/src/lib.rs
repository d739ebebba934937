//! Control-plane object store contract.
//!
//! The engine consumes the object store through [`ObjectStore`]: keyed reads,
//! label-filtered lists, optimistic-concurrency writes and a per-type watch
//! stream. The in-memory [`InMemoryStore`] backs tests and local development;
//! production deployments plug a real control-plane client into the same
//! trait.

pub mod apply;
pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use apply::{apply, merge_desired};
pub use error::StoreError;
pub use event::{EventRecorder, EventType};
pub use memory::InMemoryStore;
pub use store::{get_as, update_if_changed, BoxWatchStream, ObjectStore, WatchEvent};
