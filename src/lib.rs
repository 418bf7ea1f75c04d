//! Status Watch - polls a remote collection of items and fires handlers when
//! an item's status makes a qualifying transition.
//!
//! Each watch tracks the last status of every item it has seen, persists that
//! snapshot after every round and stops on its own once its deadline passes.

pub mod config;
pub mod handler;
pub mod persistence;
pub mod server;
pub mod source;
pub mod state;
pub mod types;
pub mod worker;

#[cfg(test)]
mod test_utils;
