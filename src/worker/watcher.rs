//! One watch's poll loop.
//!
//! A round fetches the current items, diffs them against the last persisted
//! snapshot, invokes the handler for qualifying transitions and persists the
//! new snapshot. The first round only records a baseline.
//!
//! # Failure handling
//!
//! - Fetch and store errors abort the round. The in-memory snapshot is left
//!   untouched so the next round diffs against the last durable state.
//! - Handler errors are logged and never abort the round. The item's status
//!   still advances; it fires again on its next qualifying transition.
//! - A round that ends past the deadline is the last one, whether it
//!   succeeded or failed.
//!
//! Items missing from a complete listing are dropped from the snapshot. A
//! truncated listing keeps their previous entries instead.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::handler::TriggerPayload;
use crate::persistence::{StoreError, WatchRecord, WatchStore};
use crate::source::{FilterCriteria, ItemListing, RemoteItem, RemoteSource, SourceError};
use crate::state::{ItemStep, after_invocation, plan_item};
use crate::types::{ItemId, PerItemState, WatchConfig, WatchId, WatchSnapshot};

use super::poll::PollConfig;
use super::registry::{Executor, ExecutorRegistry};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("persist failed: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// Counters for a completed round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    /// Items left after filtering.
    pub fetched: usize,
    /// Successful handler calls.
    pub triggered: usize,
    /// Failed handler calls.
    pub failed: usize,
    /// Items in the previous snapshot that were not fetched this round.
    pub dropped: usize,
    /// Unfetched items kept because the listing was truncated.
    pub carried: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// First round: snapshot recorded, no handlers invoked.
    Baseline(RoundStats),

    /// Regular round; the watch keeps polling.
    Continue(RoundStats),

    /// The round completed after the deadline; the watch stops.
    Expired(RoundStats),

    /// The watch is no longer registered (or its state was deleted). Nothing
    /// was persisted.
    Deregistered,
}

impl RoundOutcome {
    /// True if no further rounds should run.
    pub fn is_final(&self) -> bool {
        matches!(self, RoundOutcome::Expired(_) | RoundOutcome::Deregistered)
    }
}

/// Why a watch loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Expired,
    Deregistered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    /// No snapshot yet; the next round is a baseline.
    Uninitialized,
    Polling,
    Stopped,
}

pub struct Watcher<S, St> {
    id: WatchId,
    source: Arc<S>,
    store: Arc<St>,
    registry: Arc<ExecutorRegistry>,
    poll: PollConfig,
    deadline: DateTime<Utc>,
    snapshot: Option<WatchSnapshot>,
    phase: WatchPhase,
}

impl<S: RemoteSource, St: WatchStore> Watcher<S, St> {
    /// Builds a watcher from its persisted record.
    pub fn new(
        record: WatchRecord,
        source: Arc<S>,
        store: Arc<St>,
        registry: Arc<ExecutorRegistry>,
        poll: PollConfig,
    ) -> Self {
        let phase = if record.is_uninitialized() {
            WatchPhase::Uninitialized
        } else {
            WatchPhase::Polling
        };
        Watcher {
            id: record.watch_id,
            source,
            store,
            registry,
            poll,
            deadline: record.config.deadline,
            snapshot: record.snapshot,
            phase,
        }
    }

    pub fn id(&self) -> &WatchId {
        &self.id
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    /// The last successfully persisted snapshot.
    pub fn snapshot(&self) -> Option<&WatchSnapshot> {
        self.snapshot.as_ref()
    }

    /// Runs one round.
    #[instrument(skip(self), fields(watch = %self.id))]
    pub async fn run_round(&mut self) -> Result<RoundOutcome> {
        let Some(executor) = self.registry.lookup(&self.id).await else {
            debug!("Watch is no longer registered");
            self.phase = WatchPhase::Stopped;
            return Ok(RoundOutcome::Deregistered);
        };
        let config = executor.config.as_ref();

        let criteria = FilterCriteria::from(config);
        let ItemListing {
            mut items,
            truncated,
        } = self.source.fetch_items(&criteria).await?;
        criteria.retain_matching(&mut items);

        let (next, stats, baseline) = match &self.snapshot {
            None => {
                let snapshot = self.baseline(&items);
                let stats = RoundStats {
                    fetched: items.len(),
                    ..RoundStats::default()
                };
                (snapshot, stats, true)
            }
            Some(previous) => {
                let (mut snapshot, mut stats) = self.diff(previous, &items, &executor).await;
                if truncated {
                    stats.carried = carry_unfetched(previous, &mut snapshot);
                    stats.dropped = 0;
                }
                (snapshot, stats, false)
            }
        };

        match self.store.persist(&self.id, &next) {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                debug!("Watch state was deleted mid-round; discarding round");
                self.phase = WatchPhase::Stopped;
                return Ok(RoundOutcome::Deregistered);
            }
            Err(e) => return Err(e.into()),
        }
        self.snapshot = Some(next);
        self.phase = WatchPhase::Polling;

        debug!(
            fetched = stats.fetched,
            triggered = stats.triggered,
            failed = stats.failed,
            dropped = stats.dropped,
            carried = stats.carried,
            truncated,
            baseline,
            "Round complete"
        );

        if config.is_expired(Utc::now()) {
            info!(deadline = %config.deadline, "Deadline passed, stopping watch");
            self.phase = WatchPhase::Stopped;
            return Ok(RoundOutcome::Expired(stats));
        }

        Ok(if baseline {
            RoundOutcome::Baseline(stats)
        } else {
            RoundOutcome::Continue(stats)
        })
    }

    fn baseline(&self, items: &[RemoteItem]) -> WatchSnapshot {
        items
            .iter()
            .map(|item| {
                let status = self.source.convert_status(item);
                (item.id.clone(), PerItemState::new(status))
            })
            .collect()
    }

    async fn diff(
        &self,
        previous: &WatchSnapshot,
        items: &[RemoteItem],
        executor: &Executor,
    ) -> (WatchSnapshot, RoundStats) {
        let config: &WatchConfig = &executor.config;
        let mut next = WatchSnapshot::new();
        let mut failed: HashSet<ItemId> = HashSet::new();
        let mut stats = RoundStats {
            fetched: items.len(),
            ..RoundStats::default()
        };

        for item in items {
            let new_status = self.source.convert_status(item);
            // A duplicate id within one round diffs against its earlier entry.
            let stored = next
                .get(&item.id)
                .or_else(|| previous.get(&item.id))
                .copied()
                .unwrap_or_default();

            let step = plan_item(
                stored,
                new_status,
                config.from_value,
                config.to_value,
                failed.contains(&item.id),
            );

            let state = match step {
                ItemStep::Record(state) => state,
                ItemStep::Fire { old, new } => {
                    let payload = TriggerPayload {
                        watch_id: self.id.clone(),
                        item_id: item.id.clone(),
                        from: old,
                        to: new,
                        item: item.clone(),
                        detected_at: Utc::now(),
                    };
                    match executor.handler.invoke(payload).await {
                        Ok(()) => {
                            info!(item = %item.id, from = %old, to = %new, "Triggered");
                            stats.triggered += 1;
                            after_invocation(new, true, config.trigger_mode)
                        }
                        Err(e) => {
                            warn!(
                                item = %item.id,
                                from = %old,
                                to = %new,
                                error = %e,
                                "Handler failed; item stays eligible"
                            );
                            stats.failed += 1;
                            failed.insert(item.id.clone());
                            after_invocation(new, false, config.trigger_mode)
                        }
                    }
                }
            };
            next.insert(item.id.clone(), state);
        }

        stats.dropped = previous.keys().filter(|id| !next.contains_key(*id)).count();
        (next, stats)
    }

    /// Runs rounds until the deadline passes, the watch is deregistered or
    /// `shutdown` fires.
    ///
    /// Cancellation interrupts an in-flight round at its next await point;
    /// the interrupted round persists nothing.
    #[instrument(skip_all, fields(watch = %self.id))]
    pub async fn run(mut self, shutdown: CancellationToken) -> LoopExit {
        info!(deadline = %self.deadline, "Watch loop started");

        let initial_delay = self.poll.initial_poll_delay(&self.id);
        if !sleep_or_cancel(initial_delay, &shutdown).await {
            return LoopExit::Cancelled;
        }

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping watch");
                    return LoopExit::Cancelled;
                }
                result = self.run_round() => result,
            };

            match result {
                Ok(RoundOutcome::Expired(_)) => return LoopExit::Expired,
                Ok(RoundOutcome::Deregistered) => {
                    info!("Watch deregistered, stopping");
                    return LoopExit::Deregistered;
                }
                Ok(_) => {}
                Err(e) => {
                    if Utc::now() > self.deadline {
                        warn!(error = %e, "Round failed after deadline, stopping watch");
                        self.phase = WatchPhase::Stopped;
                        return LoopExit::Expired;
                    }
                    warn!(error = %e, "Round failed, retrying next interval");
                }
            }

            let delay = self.poll.poll_interval_with_jitter(&self.id);
            if !sleep_or_cancel(delay, &shutdown).await {
                return LoopExit::Cancelled;
            }
        }
    }
}

/// Copies previous entries for ids missing from `next`. Returns how many.
fn carry_unfetched(previous: &WatchSnapshot, next: &mut WatchSnapshot) -> usize {
    let mut carried = 0;
    for (id, state) in previous {
        if !next.contains_key(id) {
            next.insert(id.clone(), *state);
            carried += 1;
        }
    }
    carried
}

/// Returns false if cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutdown signal received, stopping watch");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
