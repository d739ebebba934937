//! Engine kernel.
//!
//! Controllers pull keyed items from a deduplicating, rate-limited work
//! queue fed by the store's watch stream. The queue guarantees at most one
//! in-flight reconcile per key; workers within a pool run in parallel across
//! distinct keys. Configuration follows the profile-layered YAML + env
//! override scheme.

pub mod config;
pub mod controller;
pub mod queue;

pub use config::{ConfigError, ConfigValue, EngineConfig, WeftConfig};
pub use controller::{forward_watch, Action, BoxError, Controller, Reconciler};
pub use queue::{RateLimit, WorkQueue};
