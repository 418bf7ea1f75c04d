//! Transition policy: which status changes fire the handler.
//!
//! Pure functions only. The watcher feeds each fetched item through
//! [`plan_item`], performs the handler call if asked to, and stores the state
//! returned by [`after_invocation`].

use crate::types::{EntityStatus, PerItemState, TriggerMode};

/// Decides whether a change from `old` to `new` qualifies under the filters.
///
/// - No change never qualifies.
/// - `from`: the old status must have progressed to at least `from`.
///   A terminal `from` never qualifies since nothing moves on from it.
/// - `to`: the new status must be at or beyond `to`. A terminal `to` requires
///   that exact outcome; `NotSet` as a target never qualifies.
/// - Absent filters impose nothing; present filters must both pass.
pub fn should_trigger(
    old: EntityStatus,
    new: EntityStatus,
    from: Option<EntityStatus>,
    to: Option<EntityStatus>,
) -> bool {
    if old == new {
        return false;
    }
    from.is_none_or(|f| from_filter_passes(old, f)) && to.is_none_or(|t| to_filter_passes(new, t))
}

fn from_filter_passes(old: EntityStatus, filter: EntityStatus) -> bool {
    !filter.is_terminal() && old.rank() >= filter.rank()
}

fn to_filter_passes(new: EntityStatus, filter: EntityStatus) -> bool {
    match filter {
        EntityStatus::NotSet => false,
        terminal if terminal.is_terminal() => new == terminal,
        threshold => new.rank() >= threshold.rank(),
    }
}

/// What the watcher should do with one fetched item this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStep {
    /// Store this state; no handler call.
    Record(PerItemState),

    /// Invoke the handler for `old -> new`, then store [`after_invocation`].
    Fire {
        old: EntityStatus,
        new: EntityStatus,
    },
}

/// Plans the per-item step of a round.
///
/// `previous` is the last stored state for the item (default if unseen).
/// `failed_this_round` is true when the item's handler already failed in the
/// current round; such items are left alone until the next round.
pub fn plan_item(
    previous: PerItemState,
    new: EntityStatus,
    from: Option<EntityStatus>,
    to: Option<EntityStatus>,
    failed_this_round: bool,
) -> ItemStep {
    let state = previous.rearm_if_regressed(new);

    if state.already_triggered || state.status == new || failed_this_round {
        return ItemStep::Record(state);
    }

    if should_trigger(state.status, new, from, to) {
        ItemStep::Fire {
            old: state.status,
            new,
        }
    } else {
        ItemStep::Record(PerItemState::new(new))
    }
}

/// State stored after a handler call for a transition into `new`.
///
/// The status always advances; only a successful call in trigger-once mode
/// marks the item as fired.
pub fn after_invocation(new: EntityStatus, succeeded: bool, mode: TriggerMode) -> PerItemState {
    PerItemState {
        status: new,
        already_triggered: succeeded && mode.is_once(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntityStatus::*;
    use crate::test_utils::arb_status;
    use proptest::prelude::*;

    fn arb_filter() -> impl Strategy<Value = Option<EntityStatus>> {
        prop::option::of(arb_status())
    }

    mod should_trigger_tests {
        use super::*;

        #[test]
        fn from_active_requires_old_active_or_beyond() {
            assert!(!should_trigger(Draft, Active, Some(Active), None));
            assert!(should_trigger(Active, Completed, Some(Active), None));
        }

        #[test]
        fn to_completed_excludes_abandoned() {
            assert!(should_trigger(Active, Completed, None, Some(Completed)));
            assert!(!should_trigger(Active, Abandoned, None, Some(Completed)));
        }

        #[test]
        fn to_active_accepts_active_and_beyond() {
            assert!(should_trigger(Draft, Active, None, Some(Active)));
            assert!(should_trigger(Draft, Completed, None, Some(Active)));
            assert!(should_trigger(Draft, Abandoned, None, Some(Active)));
            assert!(!should_trigger(NotSet, Draft, None, Some(Active)));
        }

        #[test]
        fn draft_to_active_with_both_filters() {
            assert!(should_trigger(Draft, Active, Some(Draft), Some(Active)));
            assert!(!should_trigger(NotSet, Active, Some(Draft), Some(Active)));
        }

        #[test]
        fn terminal_from_never_qualifies() {
            for old in EntityStatus::ALL {
                for new in EntityStatus::ALL {
                    assert!(!should_trigger(old, new, Some(Completed), None));
                    assert!(!should_trigger(old, new, Some(Abandoned), None));
                }
            }
        }

        #[test]
        fn notset_target_never_qualifies() {
            for old in EntityStatus::ALL {
                for new in EntityStatus::ALL {
                    assert!(!should_trigger(old, new, None, Some(NotSet)));
                }
            }
        }

        #[test]
        fn no_filters_fire_on_any_change() {
            assert!(should_trigger(NotSet, Draft, None, None));
            assert!(should_trigger(Completed, Abandoned, None, None));
            assert!(should_trigger(Active, Draft, None, None));
        }
    }

    mod plan_item_tests {
        use super::*;

        #[test]
        fn unseen_item_fires_when_policy_allows() {
            let step = plan_item(PerItemState::default(), Active, None, Some(Active), false);
            assert_eq!(
                step,
                ItemStep::Fire {
                    old: NotSet,
                    new: Active
                }
            );
        }

        #[test]
        fn unchanged_item_is_recorded_as_is() {
            let prev = PerItemState::new(Active);
            assert_eq!(
                plan_item(prev, Active, None, None, false),
                ItemStep::Record(prev)
            );
        }

        #[test]
        fn triggered_item_keeps_stored_status() {
            let prev = PerItemState {
                status: Active,
                already_triggered: true,
            };
            assert_eq!(
                plan_item(prev, Completed, None, None, false),
                ItemStep::Record(prev)
            );
        }

        #[test]
        fn non_qualifying_change_advances_status() {
            let prev = PerItemState::new(Draft);
            assert_eq!(
                plan_item(prev, Active, Some(Active), None, false),
                ItemStep::Record(PerItemState::new(Active))
            );
        }

        #[test]
        fn failed_item_is_left_alone() {
            let prev = PerItemState::new(Draft);
            assert_eq!(
                plan_item(prev, Active, None, None, true),
                ItemStep::Record(prev)
            );
        }

        #[test]
        fn regression_rearms_then_next_forward_move_fires() {
            let fired = PerItemState {
                status: Active,
                already_triggered: true,
            };

            // Round n: regression to Draft re-arms and records Draft.
            let step = plan_item(fired, Draft, Some(Draft), Some(Active), false);
            let stored = match step {
                ItemStep::Record(state) => state,
                other => panic!("expected Record, got {:?}", other),
            };
            assert_eq!(stored, PerItemState::new(Draft));

            // Round n+1: Draft -> Active fires again.
            assert_eq!(
                plan_item(stored, Active, Some(Draft), Some(Active), false),
                ItemStep::Fire {
                    old: Draft,
                    new: Active
                }
            );
        }
    }

    #[test]
    fn after_invocation_marks_only_successful_once() {
        assert_eq!(
            after_invocation(Active, true, TriggerMode::Once),
            PerItemState {
                status: Active,
                already_triggered: true
            }
        );
        assert_eq!(
            after_invocation(Active, false, TriggerMode::Once),
            PerItemState::new(Active)
        );
        assert_eq!(
            after_invocation(Active, true, TriggerMode::EveryTransition),
            PerItemState::new(Active)
        );
    }

    proptest! {
        #[test]
        fn equal_statuses_never_trigger(
            status in arb_status(),
            from in arb_filter(),
            to in arb_filter(),
        ) {
            prop_assert!(!should_trigger(status, status, from, to));
        }

        #[test]
        fn filters_combine_with_and(
            old in arb_status(),
            new in arb_status(),
            from in arb_status(),
            to in arb_status(),
        ) {
            let both = should_trigger(old, new, Some(from), Some(to));
            let only_from = should_trigger(old, new, Some(from), None);
            let only_to = should_trigger(old, new, None, Some(to));
            prop_assert_eq!(both, only_from && only_to);
        }

        #[test]
        fn policy_is_deterministic(
            old in arb_status(),
            new in arb_status(),
            from in arb_filter(),
            to in arb_filter(),
        ) {
            prop_assert_eq!(
                should_trigger(old, new, from, to),
                should_trigger(old, new, from, to)
            );
        }

        #[test]
        fn planned_fire_implies_policy(
            prev_status in arb_status(),
            triggered in any::<bool>(),
            new in arb_status(),
            from in arb_filter(),
            to in arb_filter(),
        ) {
            let prev = PerItemState { status: prev_status, already_triggered: triggered };
            if let ItemStep::Fire { old, new: fired_new } = plan_item(prev, new, from, to, false) {
                prop_assert_eq!(fired_new, new);
                prop_assert!(should_trigger(old, new, from, to));
            }
        }
    }
}
