//! Durable checkpoint store for watches.
//!
//! The watcher only talks to the [`WatchStore`] trait. Two implementations
//! ship with the crate:
//!
//! - [`FileWatchStore`]: one JSON record per watch under
//!   `<root>/<watch_id>/watch.json`, replaced atomically every round.
//! - [`InMemoryWatchStore`]: process-local, for tests and ephemeral runs.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, warn};

use super::snapshot::{
    SnapshotError, WatchRecord, fsync_dir, replace_record_atomic, save_record_atomic,
    try_load_record,
};
use crate::types::{WatchConfig, WatchId, WatchSnapshot};

const RECORD_FILE: &str = "watch.json";

#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the watch (never created, or deleted).
    #[error("no persisted state for watch {0}")]
    NotFound(WatchId),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The store's internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Checkpoint and recovery substrate for watches.
///
/// Implementations must make [`persist`](WatchStore::persist) atomic: after
/// a crash, [`load`](WatchStore::load) returns either the previous or the new
/// snapshot in full.
pub trait WatchStore: Send + Sync {
    /// Returns the existing record for `id`, or creates an uninitialized one
    /// with `config`.
    ///
    /// An existing record keeps its original config.
    fn create_or_resume(&self, id: &WatchId, config: &WatchConfig) -> Result<WatchRecord>;

    /// Atomically replaces the snapshot of an existing watch.
    ///
    /// Fails with [`StoreError::NotFound`] if the watch was deleted.
    fn persist(&self, id: &WatchId, snapshot: &WatchSnapshot) -> Result<WatchRecord>;

    /// Removes all persisted state for `id`. Returns false if nothing existed.
    fn delete(&self, id: &WatchId) -> Result<bool>;

    fn load(&self, id: &WatchId) -> Result<Option<WatchRecord>>;

    /// Ids of every persisted watch, sorted.
    fn list(&self) -> Result<Vec<WatchId>>;
}

/// File-backed store rooted at a state directory.
///
/// Writes and deletes are serialized, and clones share the same lock.
#[derive(Debug, Clone)]
pub struct FileWatchStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileWatchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileWatchStore {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the record of one watch.
    pub fn watch_dir(&self, id: &WatchId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn record_path(&self, id: &WatchId) -> PathBuf {
        self.watch_dir(id).join(RECORD_FILE)
    }
}

impl WatchStore for FileWatchStore {
    fn create_or_resume(&self, id: &WatchId, config: &WatchConfig) -> Result<WatchRecord> {
        let _guard = self.lock()?;
        let path = self.record_path(id);
        if let Some(existing) = try_load_record(&path)? {
            debug!(watch = %id, rounds = existing.rounds_completed, "Resuming persisted watch");
            return Ok(existing);
        }

        let record = WatchRecord::new(id.clone(), config.clone());
        save_record_atomic(&path, &record)?;
        debug!(watch = %id, path = %path.display(), "Created watch record");
        Ok(record)
    }

    fn persist(&self, id: &WatchId, snapshot: &WatchSnapshot) -> Result<WatchRecord> {
        let _guard = self.lock()?;
        let path = self.record_path(id);
        let mut record = try_load_record(&path)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.record_round(snapshot.clone());
        match replace_record_atomic(&path, &record) {
            Ok(()) => Ok(record),
            Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, id: &WatchId) -> Result<bool> {
        let _guard = self.lock()?;
        let dir = self.watch_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                fsync_dir(&self.root)?;
                debug!(watch = %id, "Deleted watch state");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn load(&self, id: &WatchId) -> Result<Option<WatchRecord>> {
        Ok(try_load_record(&self.record_path(id))?)
    }

    fn list(&self) -> Result<Vec<WatchId>> {
        let read_dir = match std::fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(entry = ?name, "Skipping non-UTF-8 entry in state directory");
                continue;
            };
            match WatchId::parse(name) {
                Ok(id) if entry.path().join(RECORD_FILE).exists() => ids.push(id),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unexpected entry in state directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Process-local store. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryWatchStore {
    records: Mutex<HashMap<WatchId, WatchRecord>>,
}

impl InMemoryWatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<WatchId, WatchRecord>>> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl WatchStore for InMemoryWatchStore {
    fn create_or_resume(&self, id: &WatchId, config: &WatchConfig) -> Result<WatchRecord> {
        let mut records = self.records()?;
        let record = records
            .entry(id.clone())
            .or_insert_with(|| WatchRecord::new(id.clone(), config.clone()));
        Ok(record.clone())
    }

    fn persist(&self, id: &WatchId, snapshot: &WatchSnapshot) -> Result<WatchRecord> {
        let mut records = self.records()?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.record_round(snapshot.clone());
        Ok(record.clone())
    }

    fn delete(&self, id: &WatchId) -> Result<bool> {
        Ok(self.records()?.remove(id).is_some())
    }

    fn load(&self, id: &WatchId) -> Result<Option<WatchRecord>> {
        Ok(self.records()?.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<WatchId>> {
        let mut ids: Vec<_> = self.records()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
