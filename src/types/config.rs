//! Watch configuration and the declaration surface it is resolved from.
//!
//! A [`WatchDeclaration`] is what a caller writes (all strings, as it would
//! appear in a config file). It is resolved into an immutable [`WatchConfig`]
//! before the watch starts; anything wrong with it is a [`ConfigError`] and the
//! watch never runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{InvalidWatchId, WatchId};
use super::status::{EntityStatus, UnknownStatus};

/// Errors in a watch declaration or configuration. Always fatal for that watch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("project name must not be empty")]
    EmptyProjectName,

    #[error("{0}")]
    InvalidWatchId(#[from] InvalidWatchId),

    #[error("invalid {field} filter: {source}")]
    InvalidStatus {
        field: &'static str,
        #[source]
        source: UnknownStatus,
    },

    #[error("a deadline is required (set `deadline` or `duration_secs`)")]
    MissingDeadline,

    #[error("set only one of `deadline` and `duration_secs`")]
    AmbiguousDeadline,

    #[error("invalid deadline {value:?}: {reason}")]
    InvalidDeadline { value: String, reason: String },

    #[error("unknown trigger mode {0:?} (expected once or every_transition)")]
    InvalidTriggerMode(String),
}

/// Whether an item may fire more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Fire at most once per item until it regresses to draft.
    #[default]
    Once,

    /// Fire on every qualifying transition.
    EveryTransition,
}

impl TriggerMode {
    pub fn is_once(self) -> bool {
        matches!(self, TriggerMode::Once)
    }
}

/// Resolved, validated configuration of one watch.
///
/// Immutable once the watch has started; it is persisted alongside the
/// snapshot so a resumed watch uses exactly the config it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Organisation / owner / project that scopes the remote query.
    pub project_name: String,

    /// Optional repository name (filtered locally if the source can't).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Optional source branch (or equivalent) filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filter: Option<String>,

    /// Optional target branch (or equivalent) filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_filter: Option<String>,

    /// Only transitions whose old status has progressed to at least this qualify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_value: Option<EntityStatus>,

    /// Only transitions whose new status is at or beyond this qualify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_value: Option<EntityStatus>,

    /// Polling stops after the first round that ends past this instant.
    pub deadline: DateTime<Utc>,

    #[serde(default)]
    pub trigger_mode: TriggerMode,
}

impl WatchConfig {
    /// Creates a config with no filters and trigger-once semantics.
    pub fn new(project_name: impl Into<String>, deadline: DateTime<Utc>) -> Self {
        WatchConfig {
            project_name: project_name.into(),
            repository: None,
            source_filter: None,
            target_filter: None,
            from_value: None,
            to_value: None,
            deadline,
            trigger_mode: TriggerMode::Once,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_source_filter(mut self, source: impl Into<String>) -> Self {
        self.source_filter = Some(source.into());
        self
    }

    pub fn with_target_filter(mut self, target: impl Into<String>) -> Self {
        self.target_filter = Some(target.into());
        self
    }

    pub fn with_from_value(mut self, from: EntityStatus) -> Self {
        self.from_value = Some(from);
        self
    }

    pub fn with_to_value(mut self, to: EntityStatus) -> Self {
        self.to_value = Some(to);
        self
    }

    pub fn with_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.trigger_mode = mode;
        self
    }

    /// Checks the invariants a watch needs before it may start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::EmptyProjectName);
        }
        Ok(())
    }

    /// Returns true once `now` is strictly past the deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// Caller-facing declaration of a watch, as read from a declarations file.
///
/// Empty strings are treated as absent so declarations generated from
/// templates don't need to omit unused fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchDeclaration {
    pub id: String,
    pub project_name: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub from_value: Option<String>,
    #[serde(default)]
    pub to_value: Option<String>,
    /// Absolute RFC 3339 deadline.
    #[serde(default)]
    pub deadline: Option<String>,
    /// Deadline relative to resolution time.
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub trigger_mode: Option<String>,
}

impl WatchDeclaration {
    /// Resolves the declaration into a validated id and config.
    ///
    /// `now` anchors `duration_secs`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<(WatchId, WatchConfig), ConfigError> {
        let id = WatchId::parse(self.id.trim())?;

        let deadline = match (non_empty(&self.deadline), self.duration_secs) {
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousDeadline),
            (None, None) => return Err(ConfigError::MissingDeadline),
            (Some(raw), None) => DateTime::parse_from_rfc3339(raw)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| ConfigError::InvalidDeadline {
                    value: raw.to_string(),
                    reason: e.to_string(),
                })?,
            (None, Some(secs)) => {
                let offset = i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .ok_or_else(|| ConfigError::InvalidDeadline {
                        value: secs.to_string(),
                        reason: "duration out of range".to_string(),
                    })?;
                now.checked_add_signed(offset)
                    .ok_or_else(|| ConfigError::InvalidDeadline {
                        value: secs.to_string(),
                        reason: "duration out of range".to_string(),
                    })?
            }
        };

        let trigger_mode = match non_empty(&self.trigger_mode) {
            None => TriggerMode::default(),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "once" => TriggerMode::Once,
                "every_transition" | "every" => TriggerMode::EveryTransition,
                _ => return Err(ConfigError::InvalidTriggerMode(raw.to_string())),
            },
        };

        let config = WatchConfig {
            project_name: self.project_name.trim().to_string(),
            repository: non_empty(&self.repository).map(str::to_string),
            source_filter: non_empty(&self.source_branch).map(str::to_string),
            target_filter: non_empty(&self.target_branch).map(str::to_string),
            from_value: parse_status("from", &self.from_value)?,
            to_value: parse_status("to", &self.to_value)?,
            deadline,
            trigger_mode,
        };
        config.validate()?;

        Ok((id, config))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_status(
    field: &'static str,
    value: &Option<String>,
) -> Result<Option<EntityStatus>, ConfigError> {
    non_empty(value)
        .map(|raw| {
            raw.parse()
                .map_err(|source| ConfigError::InvalidStatus { field, source })
        })
        .transpose()
}
