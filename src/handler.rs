//! Handlers invoked when a qualifying transition is detected.
//!
//! A handler is opaque to the watcher: it receives a [`TriggerPayload`] and
//! reports success or failure. Failures are logged and the item is retried
//! on its next transition; they never stop the watch.

use std::error::Error as StdError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::source::RemoteItem;
use crate::types::{EntityStatus, ItemId, WatchId};

/// Everything a handler learns about one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub watch_id: WatchId,
    pub item_id: ItemId,
    pub from: EntityStatus,
    pub to: EntityStatus,
    /// The changed item as fetched this round.
    pub item: RemoteItem,
    pub detected_at: DateTime<Utc>,
}

/// A handler invocation failed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        HandlerError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Callback fired for qualifying transitions.
///
/// Stored as `Arc<dyn TriggerHandler>` in the executor registry, so each
/// watch can carry a different handler.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn invoke(&self, payload: TriggerPayload) -> Result<(), HandlerError>;
}

/// Logs each trigger at info level. Used by the binary when no other
/// handler is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl TriggerHandler for LoggingHandler {
    async fn invoke(&self, payload: TriggerPayload) -> Result<(), HandlerError> {
        info!(
            watch = %payload.watch_id,
            item = %payload.item_id,
            from = %payload.from,
            to = %payload.to,
            "Transition triggered"
        );
        Ok(())
    }
}

/// Adapts a synchronous closure into a handler.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&TriggerPayload) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnHandler { f }
    }
}

#[async_trait]
impl<F> TriggerHandler for FnHandler<F>
where
    F: Fn(&TriggerPayload) -> Result<(), HandlerError> + Send + Sync,
{
    async fn invoke(&self, payload: TriggerPayload) -> Result<(), HandlerError> {
        (self.f)(&payload)
    }
}
