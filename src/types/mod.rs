//! Core domain types for the watcher.
//!
//! Value types only: identifiers, statuses, per-item bookkeeping and the
//! resolved watch configuration.

pub mod config;
pub mod ids;
pub mod status;

pub use config::{ConfigError, TriggerMode, WatchConfig, WatchDeclaration};
pub use ids::{InvalidWatchId, ItemId, WatchId};
pub use status::{EntityStatus, PerItemState, UnknownStatus, WatchSnapshot};
