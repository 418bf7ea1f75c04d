//! On-disk record of one watch.
//!
//! A [`WatchRecord`] holds everything needed to resume a watch after a
//! restart: its immutable config and the snapshot written by the last
//! completed round.
//!
//! # Atomic Writes
//!
//! Records are replaced with write-to-temp-then-rename:
//! 1. Write `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename over `<path>`
//! 4. fsync the directory
//!
//! A crash at any point leaves either the previous round's record or the new
//! one, never a mix of the two.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{WatchConfig, WatchId, WatchSnapshot};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Persisted state of one watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRecord {
    pub schema_version: u32,

    pub watch_id: WatchId,

    /// Config the watch was started with. Never changes after creation.
    pub config: WatchConfig,

    /// Item states after the last completed round; `None` until the baseline
    /// round has run.
    pub snapshot: Option<WatchSnapshot>,

    /// Number of rounds whose snapshot has been persisted.
    pub rounds_completed: u64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl WatchRecord {
    /// Creates a record for a watch that has not polled yet.
    pub fn new(watch_id: WatchId, config: WatchConfig) -> Self {
        let now = Utc::now();
        WatchRecord {
            schema_version: SCHEMA_VERSION,
            watch_id,
            config,
            snapshot: None,
            rounds_completed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true until the baseline round has been persisted.
    pub fn is_uninitialized(&self) -> bool {
        self.snapshot.is_none()
    }

    /// Replaces the snapshot with the result of a completed round.
    pub fn record_round(&mut self, snapshot: WatchSnapshot) {
        self.snapshot = Some(snapshot);
        self.rounds_completed += 1;
        self.updated_at = Utc::now();
    }
}

/// Syncs a directory so created, renamed or removed entries survive power loss.
pub(crate) fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    File::open(dir_path)?.sync_all()
}

/// Writes a record atomically, creating parent directories as needed.
pub fn save_record_atomic(path: &Path, record: &WatchRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    replace_record_atomic(path, record)
}

/// Writes a record atomically into an existing directory.
///
/// Fails with an `io::ErrorKind::NotFound` error if the parent directory is
/// gone, so a removed watch is never recreated.
pub fn replace_record_atomic(path: &Path, record: &WatchRecord) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(record)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Loads a record, rejecting unknown schema versions.
pub fn load_record(path: &Path) -> Result<WatchRecord> {
    let bytes = std::fs::read(path)?;
    let record: WatchRecord = serde_json::from_slice(&bytes)?;

    if record.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: record.schema_version,
        });
    }

    Ok(record)
}

/// Loads a record, returning `None` if the file doesn't exist.
///
/// Other errors (malformed JSON, schema mismatch) are propagated.
pub fn try_load_record(path: &Path) -> Result<Option<WatchRecord>> {
    match load_record(path) {
        Ok(record) => Ok(Some(record)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityStatus, ItemId, PerItemState, TriggerMode};
    use crate::test_utils::{arb_snapshot, arb_status};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn arb_datetime() -> impl Strategy<Value = DateTime<Utc>> {
        (946684800i64..4102444800i64).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap())
    }

    fn arb_config() -> impl Strategy<Value = WatchConfig> {
        (
            "[a-z][a-z0-9-]{0,20}",
            prop::option::of("[a-z][a-z0-9_-]{0,20}"),
            prop::option::of("[a-z][a-z0-9/-]{0,20}"),
            prop::option::of(arb_status()),
            prop::option::of(arb_status()),
            arb_datetime(),
            any::<bool>(),
        )
            .prop_map(|(project, repository, target, from, to, deadline, once)| {
                let mut config = WatchConfig::new(project, deadline).with_trigger_mode(if once {
                    TriggerMode::Once
                } else {
                    TriggerMode::EveryTransition
                });
                config.repository = repository;
                config.target_filter = target;
                config.from_value = from;
                config.to_value = to;
                config
            })
    }

    fn arb_record() -> impl Strategy<Value = WatchRecord> {
        (
            "[a-z][a-z0-9-]{0,20}",
            arb_config(),
            prop::option::of(arb_snapshot()),
            0u64..10000,
            arb_datetime(),
            arb_datetime(),
        )
            .prop_map(
                |(id, config, snapshot, rounds_completed, created_at, updated_at)| WatchRecord {
                    schema_version: SCHEMA_VERSION,
                    watch_id: WatchId::parse(id).unwrap(),
                    config,
                    snapshot,
                    rounds_completed,
                    created_at,
                    updated_at,
                },
            )
    }

    proptest! {
        #[test]
        fn atomic_save_load_roundtrip(record in arb_record()) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("watch.json");

            save_record_atomic(&path, &record).unwrap();
            let loaded = load_record(&path).unwrap();

            prop_assert_eq!(record, loaded);
        }

        #[test]
        fn temp_file_cleaned_up(record in arb_record()) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("watch.json");
            let tmp_path = path.with_extension("json.tmp");

            save_record_atomic(&path, &record).unwrap();

            prop_assert!(path.exists(), "record file should exist");
            prop_assert!(!tmp_path.exists(), "temp file should be cleaned up");
        }
    }

    #[test]
    fn new_record_is_uninitialized() {
        let record = WatchRecord::new(
            WatchId::parse("w").unwrap(),
            WatchConfig::new("octocat", Utc::now()),
        );

        assert!(record.is_uninitialized());
        assert_eq!(record.rounds_completed, 0);
        assert_eq!(record.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn record_round_replaces_snapshot() {
        let mut record = WatchRecord::new(
            WatchId::parse("w").unwrap(),
            WatchConfig::new("octocat", Utc::now()),
        );
        let mut snapshot = WatchSnapshot::new();
        snapshot.insert(ItemId::from(1), PerItemState::new(EntityStatus::Draft));

        record.record_round(snapshot.clone());

        assert!(!record.is_uninitialized());
        assert_eq!(record.snapshot, Some(snapshot));
        assert_eq!(record.rounds_completed, 1);
    }

    #[test]
    fn try_load_nonexistent_returns_none() {
        let dir = tempdir().unwrap();
        let result = try_load_record(&dir.path().join("missing.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invalid.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert!(matches!(load_record(&path), Err(SnapshotError::Json(_))));
    }

    #[test]
    fn load_wrong_schema_version_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("watch.json");

        let mut record = WatchRecord::new(
            WatchId::parse("w").unwrap(),
            WatchConfig::new("octocat", Utc::now()),
        );
        record.schema_version = SCHEMA_VERSION + 1;
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        assert!(matches!(
            load_record(&path),
            Err(SnapshotError::SchemaMismatch {
                expected: 1,
                got: 2
            })
        ));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/watch.json");

        let record = WatchRecord::new(
            WatchId::parse("w").unwrap(),
            WatchConfig::new("octocat", Utc::now()),
        );
        save_record_atomic(&path, &record).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn replace_does_not_create_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone/watch.json");

        let record = WatchRecord::new(
            WatchId::parse("w").unwrap(),
            WatchConfig::new("octocat", Utc::now()),
        );
        let err = replace_record_atomic(&path, &record).unwrap_err();

        assert!(matches!(err, SnapshotError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
        assert!(!dir.path().join("gone").exists());
    }

    #[test]
    fn fsync_dir_fails_on_nonexistent() {
        assert!(fsync_dir(Path::new("/nonexistent/path/that/does/not/exist")).is_err());
    }
}
