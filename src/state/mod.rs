//! Pure decision logic for the watcher.
//!
//! Nothing here performs I/O; the worker applies these decisions.

pub mod transitions;

pub use transitions::{ItemStep, after_invocation, plan_item, should_trigger};
