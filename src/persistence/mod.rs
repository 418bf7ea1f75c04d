//! Persistence layer for watches.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/<watch_id>/
//!   watch.json        # config + snapshot of the last completed round
//! ```
//!
//! # Crash Safety
//!
//! Each round replaces `watch.json` atomically (temp file, fsync, rename,
//! fsync directory). Recovery is a plain load: the file always holds the last
//! completed round, so a crash loses at most the round in flight.

pub mod snapshot;
pub mod store;

pub use snapshot::{
    SCHEMA_VERSION, SnapshotError, WatchRecord, load_record, replace_record_atomic,
    save_record_atomic, try_load_record,
};
pub use store::{FileWatchStore, InMemoryWatchStore, StoreError, WatchStore};
