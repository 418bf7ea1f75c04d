//! Watch execution.
//!
//! Each watch runs its own poll loop as a tokio task. Watches share nothing
//! but the [`ExecutorRegistry`], so one slow or failing watch never delays
//! another.
//!
//! # Module Structure
//!
//! - [`registry`]: watch id to config and handler
//! - [`watcher`]: the per-watch round and loop
//! - [`supervisor`]: spawning, resuming and tearing down watch tasks
//! - [`poll`]: inter-round timing and jitter

pub mod poll;
pub mod registry;
pub mod supervisor;
pub mod watcher;


pub use poll::PollConfig;
pub use registry::{Executor, ExecutorRegistry};
pub use supervisor::{SupervisorError, WatchSupervisor};
pub use watcher::{LoopExit, RoundOutcome, RoundStats, WatchError, WatchPhase, Watcher};
