//! Newtype wrappers for watch and item identifiers.
//!
//! Keeping these distinct stops a remote item id from being used where a
//! watch id is expected (and vice versa).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity of one watched logical entity, e.g. "all PRs into main of repo X".
///
/// Watch ids double as directory names in the file-backed store, so they are
/// restricted to `[A-Za-z0-9._-]` and may not be `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WatchId(String);

/// Error returned when a watch id contains characters that are unsafe in a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid watch id {0:?}: use 1-128 characters from [A-Za-z0-9._-]")]
pub struct InvalidWatchId(pub String);

impl WatchId {
    /// Validates and wraps a watch id.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidWatchId> {
        let s = s.into();
        let valid_chars = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if s.is_empty() || s.len() > 128 || !valid_chars || s == "." || s == ".." {
            return Err(InvalidWatchId(s));
        }
        Ok(WatchId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WatchId {
    type Err = InvalidWatchId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WatchId::parse(s)
    }
}

impl TryFrom<String> for WatchId {
    type Error = InvalidWatchId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        WatchId::parse(s)
    }
}

impl From<WatchId> for String {
    fn from(id: WatchId) -> Self {
        id.0
    }
}

/// Stable identifier of a remote item (PR number, work item id, build id).
///
/// The remote source decides the format; the watcher only compares ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(s: impl Into<String>) -> Self {
        ItemId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        ItemId(n.to_string())
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}
