//! Remote source boundary.
//!
//! The watcher pulls item collections through [`RemoteSource`] and never
//! sees transport details. A source returns [`RemoteItem`]s carrying at least
//! an id, a draft flag and the raw status string; [`convert_status`] maps
//! those onto [`EntityStatus`].
//!
//! [`github`] provides a pull-request source backed by octocrab.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EntityStatus, ItemId, WatchConfig};

pub mod github;

/// One item as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: ItemId,

    /// Draft flag; takes precedence over `raw_status`.
    pub is_draft: bool,

    /// Service-specific status string (`open`, `merged`, `active`, ...).
    pub raw_status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Source branch or equivalent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,

    /// Target branch or equivalent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<String>,

    /// Raw record from the service, handed to the handler untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RemoteItem {
    /// Creates an item with no refs and an empty payload.
    pub fn new(id: impl Into<ItemId>, is_draft: bool, raw_status: impl Into<String>) -> Self {
        RemoteItem {
            id: id.into(),
            is_draft,
            raw_status: raw_status.into(),
            repository: None,
            source_ref: None,
            target_ref: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_refs(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_ref = Some(source.into());
        self.target_ref = Some(target.into());
        self
    }
}

/// Maps a remote item onto the status model.
///
/// The draft flag wins. Otherwise raw statuses are matched case-insensitively:
/// `active`/`open` are Active, `completed`/`merged` are Completed and
/// `abandoned`/`closed` are Abandoned. Anything else is NotSet.
pub fn convert_status(item: &RemoteItem) -> EntityStatus {
    if item.is_draft {
        return EntityStatus::Draft;
    }
    match item.raw_status.trim().to_ascii_lowercase().as_str() {
        "active" | "open" => EntityStatus::Active,
        "completed" | "merged" => EntityStatus::Completed,
        "abandoned" | "closed" => EntityStatus::Abandoned,
        _ => EntityStatus::NotSet,
    }
}

/// Query scope handed to the source, derived from a watch's config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub project_name: String,
    pub repository: Option<String>,
    pub source_ref: Option<String>,
    pub target_ref: Option<String>,
}

impl From<&WatchConfig> for FilterCriteria {
    fn from(config: &WatchConfig) -> Self {
        FilterCriteria {
            project_name: config.project_name.clone(),
            repository: config.repository.clone(),
            source_ref: config.source_filter.clone(),
            target_ref: config.target_filter.clone(),
        }
    }
}

impl FilterCriteria {
    /// Returns true if the item passes every filter that is set.
    ///
    /// Repository names compare case-insensitively. Refs compare after
    /// stripping a leading `refs/heads/`. An item missing a filtered field
    /// does not match.
    pub fn matches(&self, item: &RemoteItem) -> bool {
        let repository_ok = match (&self.repository, &item.repository) {
            (None, _) => true,
            (Some(want), Some(got)) => want.eq_ignore_ascii_case(got),
            (Some(_), None) => false,
        };
        repository_ok
            && ref_matches(self.source_ref.as_deref(), item.source_ref.as_deref())
            && ref_matches(self.target_ref.as_deref(), item.target_ref.as_deref())
    }

    /// Drops items the source could not filter server-side.
    pub fn retain_matching(&self, items: &mut Vec<RemoteItem>) {
        items.retain(|item| self.matches(item));
    }
}

fn ref_matches(want: Option<&str>, got: Option<&str>) -> bool {
    match (want, got) {
        (None, _) => true,
        (Some(want), Some(got)) => short_ref(want) == short_ref(got),
        (Some(_), None) => false,
    }
}

fn short_ref(r: &str) -> &str {
    r.strip_prefix("refs/heads/").unwrap_or(r)
}

/// Whether retrying the same fetch can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Network, rate limit, 5xx. The next round should succeed.
    Transient,

    /// Auth, not found, bad criteria. Needs operator attention.
    Permanent,
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceErrorKind::Transient => f.write_str("transient"),
            SourceErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// A fetch failed. Aborts the current round; the next round retries.
#[derive(Debug, Error)]
#[error("{kind} source error: {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        SourceError {
            kind: SourceErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SourceError {
            kind: SourceErrorKind::Permanent,
            message: message.into(),
            source: None,
        }
    }
}

/// Items returned by one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemListing {
    pub items: Vec<RemoteItem>,
    /// The service stopped before every matching item was returned (a page
    /// cap, for instance). Items absent from a truncated listing are not
    /// treated as gone.
    pub truncated: bool,
}

impl ItemListing {
    pub fn complete(items: Vec<RemoteItem>) -> Self {
        ItemListing {
            items,
            truncated: false,
        }
    }

    pub fn truncated(items: Vec<RemoteItem>) -> Self {
        ItemListing {
            items,
            truncated: true,
        }
    }
}

/// Fetches the current collection of items for a watch.
///
/// Implementations are shared by every watch in the process, so a call must
/// not depend on state left behind by an earlier call.
pub trait RemoteSource: Send + Sync {
    /// Returns the items matching `criteria`, in the service's order.
    ///
    /// Implementations may ignore filters they can't apply server-side; the
    /// watcher re-applies [`FilterCriteria::retain_matching`] afterwards.
    /// A listing that stops short must be marked
    /// [`truncated`](ItemListing::truncated), otherwise the watcher drops
    /// every stored item it did not see.
    fn fetch_items(
        &self,
        criteria: &FilterCriteria,
    ) -> impl Future<Output = Result<ItemListing, SourceError>> + Send;

    /// Maps an item onto the status model. Override for services with their
    /// own vocabulary.
    fn convert_status(&self, item: &RemoteItem) -> EntityStatus {
        convert_status(item)
    }
}
