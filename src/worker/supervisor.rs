//! Owns the task of every running watch.
//!
//! Each watch runs as its own tokio task with a child of the supervisor's
//! shutdown token. Watches never share mutable state; the only thing they
//! have in common is the [`ExecutorRegistry`].
//!
//! # Lifecycle
//!
//! ```text
//! start/resume ──► create_or_resume ──► register ──► spawn loop
//!                                                      │
//!        deadline passed / deregistered / cancelled ◄──┘
//!
//! delete ──► unregister ──► cancel ──► await task ──► delete state
//! ```
//!
//! Persisted state outlives an expired watch; only [`WatchSupervisor::delete`]
//! or [`WatchSupervisor::purge_expired`] removes it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::handler::TriggerHandler;
use crate::persistence::{StoreError, WatchRecord, WatchStore};
use crate::source::RemoteSource;
use crate::types::{ConfigError, WatchConfig, WatchId};

use super::poll::PollConfig;
use super::registry::ExecutorRegistry;
use super::watcher::{LoopExit, Watcher};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid watch config: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("watch {0} is already running")]
    AlreadyRunning(WatchId),

    #[error("no persisted state for watch {0}")]
    NotFound(WatchId),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

struct WatchHandle {
    task: JoinHandle<LoopExit>,
    cancel: CancellationToken,
}

impl WatchHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

pub struct WatchSupervisor<S, St> {
    source: Arc<S>,
    store: Arc<St>,
    registry: Arc<ExecutorRegistry>,
    poll: PollConfig,
    watches: RwLock<HashMap<WatchId, WatchHandle>>,
    shutdown: CancellationToken,
}

impl<S, St> WatchSupervisor<S, St>
where
    S: RemoteSource + 'static,
    St: WatchStore + 'static,
{
    pub fn new(
        source: Arc<S>,
        store: Arc<St>,
        registry: Arc<ExecutorRegistry>,
        poll: PollConfig,
    ) -> Self {
        Self::new_with_shutdown(source, store, registry, poll, CancellationToken::new())
    }

    /// Creates a supervisor whose watches stop when `shutdown` is cancelled.
    pub fn new_with_shutdown(
        source: Arc<S>,
        store: Arc<St>,
        registry: Arc<ExecutorRegistry>,
        poll: PollConfig,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            poll_interval_ms = poll.poll_interval.as_millis() as u64,
            "Creating watch supervisor"
        );
        WatchSupervisor {
            source,
            store,
            registry,
            poll,
            watches: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<St> {
        &self.store
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts a watch, resuming its persisted state if any.
    ///
    /// A persisted record keeps its own config; a differing `config` is
    /// logged and ignored. A deadline already in the past is accepted: the
    /// watch runs one round and stops.
    #[instrument(skip(self, config, handler), fields(watch = %id))]
    pub async fn start(
        &self,
        id: WatchId,
        config: WatchConfig,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<WatchRecord> {
        config.validate()?;
        self.ensure_not_running(&id).await?;

        let record = self.store.create_or_resume(&id, &config)?;
        if record.config != config {
            warn!("Watch already persisted with a different config; keeping the persisted one");
        }
        if record.is_uninitialized() {
            info!(project = %record.config.project_name, "Starting new watch");
        } else {
            info!(rounds = record.rounds_completed, "Resuming watch");
        }

        self.spawn(record.clone(), handler).await?;
        Ok(record)
    }

    /// Resumes a watch from its persisted record.
    #[instrument(skip(self, handler), fields(watch = %id))]
    pub async fn resume(
        &self,
        id: WatchId,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<WatchRecord> {
        self.ensure_not_running(&id).await?;

        let record = self
            .store
            .load(&id)?
            .ok_or_else(|| SupervisorError::NotFound(id.clone()))?;
        info!(rounds = record.rounds_completed, "Resuming watch");

        self.spawn(record.clone(), handler).await?;
        Ok(record)
    }

    /// Resumes every persisted watch that isn't already running.
    ///
    /// `handler_for` picks the handler for each record; returning `None`
    /// leaves that watch stopped. Failures for one watch are logged and do
    /// not prevent the rest from resuming.
    pub async fn resume_all<F>(&self, handler_for: F) -> Result<Vec<WatchId>>
    where
        F: Fn(&WatchId, &WatchConfig) -> Option<Arc<dyn TriggerHandler>>,
    {
        let mut resumed = Vec::new();

        for id in self.store.list()? {
            if self.is_running(&id).await {
                continue;
            }
            let record = match self.store.load(&id) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    error!(watch = %id, error = %e, "Could not load watch state, skipping");
                    continue;
                }
            };
            let Some(handler) = handler_for(&id, &record.config) else {
                debug!(watch = %id, "No handler for persisted watch, leaving it stopped");
                continue;
            };
            match self.spawn(record, handler).await {
                Ok(()) => resumed.push(id),
                Err(e) => error!(watch = %id, error = %e, "Could not resume watch"),
            }
        }

        info!(count = resumed.len(), "Resumed persisted watches");
        Ok(resumed)
    }

    /// Tears a watch down and deletes its persisted state.
    ///
    /// Returns false if the watch was neither running nor persisted.
    #[instrument(skip(self), fields(watch = %id))]
    pub async fn delete(&self, id: &WatchId) -> Result<bool> {
        let unregistered = self.registry.unregister(id).await;

        let handle = self.watches.write().await.remove(id);
        let was_running = match handle {
            Some(handle) => {
                handle.cancel.cancel();
                if let Err(e) = handle.task.await {
                    error!(error = %e, "Watch task panicked");
                }
                true
            }
            None => false,
        };

        let deleted = self.store.delete(id)?;
        info!(deleted, "Watch deleted");
        Ok(unregistered || was_running || deleted)
    }

    /// Deletes the persisted state of every stopped watch whose deadline is
    /// before `now`. Returns the ids removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<WatchId>> {
        let mut purged = Vec::new();
        for id in self.store.list()? {
            if self.is_running(&id).await {
                continue;
            }
            let expired = self
                .store
                .load(&id)?
                .is_some_and(|record| record.config.is_expired(now));
            if expired && self.delete(&id).await? {
                purged.push(id);
            }
        }
        if !purged.is_empty() {
            info!(count = purged.len(), "Purged expired watches");
        }
        Ok(purged)
    }

    pub async fn is_running(&self, id: &WatchId) -> bool {
        self.watches
            .read()
            .await
            .get(id)
            .is_some_and(WatchHandle::is_running)
    }

    pub async fn running_count(&self) -> usize {
        self.watches
            .read()
            .await
            .values()
            .filter(|h| h.is_running())
            .count()
    }

    /// Ids of running watches, sorted.
    pub async fn running_ids(&self) -> Vec<WatchId> {
        let mut ids: Vec<_> = self
            .watches
            .read()
            .await
            .iter()
            .filter(|(_, h)| h.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cancels every watch and waits for their tasks to finish. Persisted
    /// state is kept so the watches can be resumed.
    pub async fn shutdown_all(&self) {
        info!("Shutting down all watches");
        self.shutdown.cancel();

        let handles: Vec<_> = self.watches.write().await.drain().collect();
        for (id, handle) in handles {
            match handle.task.await {
                Ok(exit) => debug!(watch = %id, ?exit, "Watch stopped"),
                Err(e) => error!(watch = %id, error = %e, "Watch task panicked"),
            }
        }
    }

    async fn ensure_not_running(&self, id: &WatchId) -> Result<()> {
        if self.is_running(id).await {
            return Err(SupervisorError::AlreadyRunning(id.clone()));
        }
        Ok(())
    }

    async fn spawn(&self, record: WatchRecord, handler: Arc<dyn TriggerHandler>) -> Result<()> {
        let id = record.watch_id.clone();
        let mut watches = self.watches.write().await;

        // Double-check under the write lock.
        if watches.get(&id).is_some_and(WatchHandle::is_running) {
            return Err(SupervisorError::AlreadyRunning(id));
        }

        self.registry
            .register(id.clone(), record.config.clone(), handler)
            .await;

        let watcher = Watcher::new(
            record,
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.poll.clone(),
        );

        let cancel = self.shutdown.child_token();
        let cancel_for_handle = cancel.clone();
        let registry = Arc::clone(&self.registry);
        let id_for_task = id.clone();

        debug!(watch = %id, "Spawning watch task");
        let task = tokio::spawn(async move {
            let exit = watcher.run(cancel).await;
            if exit == LoopExit::Expired {
                registry.unregister(&id_for_task).await;
            }
            exit
        });

        watches.insert(
            id,
            WatchHandle {
                task,
                cancel: cancel_for_handle,
            },
        );
        Ok(())
    }
}
