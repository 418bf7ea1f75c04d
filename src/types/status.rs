//! Observable status of a remote item and the per-item trigger bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::ids::ItemId;

/// Point-in-time classification of a remote item.
///
/// Statuses are ordered by progress for filter evaluation (see
/// [`EntityStatus::rank`]). `Completed` and `Abandoned` share the terminal
/// rank but are distinct outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// No status observed yet, or the raw status was not recognised.
    #[default]
    NotSet,

    /// Work in progress, not ready for review.
    Draft,

    /// Open and active.
    Active,

    /// Finished successfully (merged, resolved).
    Completed,

    /// Closed without completing.
    Abandoned,
}

impl EntityStatus {
    /// Every status, lowest progress first.
    pub const ALL: [EntityStatus; 5] = [
        EntityStatus::NotSet,
        EntityStatus::Draft,
        EntityStatus::Active,
        EntityStatus::Completed,
        EntityStatus::Abandoned,
    ];

    /// Statuses at or below this rank count as a regression that re-arms a
    /// trigger-once watch. An item whose raw status stops being recognised
    /// (`NotSet`) is re-armed as well.
    pub const REGRESSION_THRESHOLD: EntityStatus = EntityStatus::Draft;

    /// Progress rank used by the transition filters.
    pub fn rank(self) -> u8 {
        match self {
            EntityStatus::NotSet => 0,
            EntityStatus::Draft => 1,
            EntityStatus::Active => 2,
            EntityStatus::Completed | EntityStatus::Abandoned => 3,
        }
    }

    /// Returns true for statuses nothing progresses beyond.
    pub fn is_terminal(self) -> bool {
        matches!(self, EntityStatus::Completed | EntityStatus::Abandoned)
    }

    /// Returns true if moving to this status counts as a regression.
    pub fn is_regression(self) -> bool {
        self.rank() <= Self::REGRESSION_THRESHOLD.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::NotSet => "notset",
            EntityStatus::Draft => "draft",
            EntityStatus::Active => "active",
            EntityStatus::Completed => "completed",
            EntityStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a declared status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status {0:?} (expected notset, draft, active, completed or abandoned)")]
pub struct UnknownStatus(pub String);

impl FromStr for EntityStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notset" | "not_set" => Ok(EntityStatus::NotSet),
            "draft" => Ok(EntityStatus::Draft),
            "active" => Ok(EntityStatus::Active),
            "completed" => Ok(EntityStatus::Completed),
            "abandoned" => Ok(EntityStatus::Abandoned),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Last observed status of one item plus whether it has already fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerItemState {
    pub status: EntityStatus,
    pub already_triggered: bool,
}

impl PerItemState {
    pub fn new(status: EntityStatus) -> Self {
        PerItemState {
            status,
            already_triggered: false,
        }
    }

    /// Resets a fired item to the unseen state when it regresses.
    ///
    /// A trigger-once item that falls back to draft (or below) is re-armed so
    /// its next forward transition fires again. Items that have not fired are
    /// returned unchanged.
    pub fn rearm_if_regressed(self, new_status: EntityStatus) -> Self {
        if self.already_triggered && new_status.is_regression() {
            PerItemState::default()
        } else {
            self
        }
    }
}

/// Persisted mapping from item id to its last known state.
///
/// Ordered so persisted files and API output are stable across rounds.
pub type WatchSnapshot = BTreeMap<ItemId, PerItemState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::arb_status;
    use proptest::prelude::*;

    #[test]
    fn ranks_follow_progress() {
        assert!(EntityStatus::NotSet.rank() < EntityStatus::Draft.rank());
        assert!(EntityStatus::Draft.rank() < EntityStatus::Active.rank());
        assert!(EntityStatus::Active.rank() < EntityStatus::Completed.rank());
        assert_eq!(
            EntityStatus::Completed.rank(),
            EntityStatus::Abandoned.rank()
        );
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Draft".parse(), Ok(EntityStatus::Draft));
        assert_eq!(" ACTIVE ".parse(), Ok(EntityStatus::Active));
        assert_eq!("completed".parse(), Ok(EntityStatus::Completed));
        assert_eq!("Abandoned".parse(), Ok(EntityStatus::Abandoned));
        assert_eq!("NotSet".parse(), Ok(EntityStatus::NotSet));
        assert!("merged".parse::<EntityStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&EntityStatus::NotSet).unwrap();
        assert_eq!(json, "\"not_set\"");
        let parsed: EntityStatus = serde_json::from_str("\"abandoned\"").unwrap();
        assert_eq!(parsed, EntityStatus::Abandoned);
    }

    #[test]
    fn triggered_active_regressing_to_draft_is_rearmed() {
        let state = PerItemState {
            status: EntityStatus::Active,
            already_triggered: true,
        };
        assert_eq!(
            state.rearm_if_regressed(EntityStatus::Draft),
            PerItemState {
                status: EntityStatus::NotSet,
                already_triggered: false,
            }
        );
    }

    #[test]
    fn triggered_item_moving_forward_is_kept() {
        let state = PerItemState {
            status: EntityStatus::Active,
            already_triggered: true,
        };
        assert_eq!(state.rearm_if_regressed(EntityStatus::Completed), state);
    }

    proptest! {
        #[test]
        fn untriggered_state_never_rearmed(old in arb_status(), new in arb_status()) {
            let state = PerItemState::new(old);
            prop_assert_eq!(state.rearm_if_regressed(new), state);
        }

        #[test]
        fn display_parses_back(status in arb_status()) {
            prop_assert_eq!(status.to_string().parse::<EntityStatus>(), Ok(status));
        }
    }
}
