//! Shared fakes and proptest generators.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::handler::{HandlerError, TriggerHandler, TriggerPayload};
use crate::persistence::store::Result as StoreResult;
use crate::persistence::{InMemoryWatchStore, StoreError, WatchRecord, WatchStore};
use crate::source::{FilterCriteria, ItemListing, RemoteItem, RemoteSource, SourceError};
use crate::types::{EntityStatus, ItemId, PerItemState, WatchConfig, WatchId, WatchSnapshot};

pub fn arb_status() -> impl Strategy<Value = EntityStatus> {
    proptest::sample::select(EntityStatus::ALL.to_vec())
}

pub fn arb_item_state() -> impl Strategy<Value = PerItemState> {
    (arb_status(), any::<bool>()).prop_map(|(status, already_triggered)| PerItemState {
        status,
        already_triggered,
    })
}

pub fn arb_snapshot() -> impl Strategy<Value = WatchSnapshot> {
    prop::collection::btree_map("[0-9]{1,6}".prop_map(ItemId::new), arb_item_state(), 0..20)
}

/// Polls `condition` every few milliseconds; panics after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

/// Scripted remote source.
///
/// Returns the current item list on every fetch, unless a failure was
/// queued with [`FakeSource::fail_next`].
#[derive(Default)]
pub struct FakeSource {
    items: Mutex<Vec<RemoteItem>>,
    truncated: Mutex<bool>,
    failures: Mutex<VecDeque<SourceError>>,
    fetches: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeSource {
    pub fn new(items: Vec<RemoteItem>) -> Self {
        FakeSource {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    pub fn set_items(&self, items: Vec<RemoteItem>) {
        *self.items.lock().unwrap() = items;
    }

    /// Replaces the raw status of one item, adding it if absent.
    pub fn set_status(&self, id: u64, is_draft: bool, raw_status: &str) {
        let mut items = self.items.lock().unwrap();
        let item = RemoteItem::new(id, is_draft, raw_status);
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    pub fn remove(&self, id: u64) {
        let id = ItemId::from(id);
        self.items.lock().unwrap().retain(|i| i.id != id);
    }

    /// Marks every following listing as cut short by the service.
    pub fn set_truncated(&self, truncated: bool) {
        *self.truncated.lock().unwrap() = truncated;
    }

    pub fn fail_next(&self, error: SourceError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn fetch_times(&self) -> Vec<DateTime<Utc>> {
        self.fetches.lock().unwrap().clone()
    }
}

impl RemoteSource for FakeSource {
    async fn fetch_items(
        &self,
        _criteria: &FilterCriteria,
    ) -> Result<ItemListing, SourceError> {
        self.fetches.lock().unwrap().push(Utc::now());
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ItemListing {
            items: self.items.lock().unwrap().clone(),
            truncated: *self.truncated.lock().unwrap(),
        })
    }
}

/// Records every invocation; fails for items listed in `failing`.
#[derive(Default)]
pub struct RecordingHandler {
    attempts: Mutex<Vec<TriggerPayload>>,
    failing: Mutex<HashSet<ItemId>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_for(ids: impl IntoIterator<Item = u64>) -> Arc<Self> {
        let handler = Self::default();
        handler.set_failing(ids);
        Arc::new(handler)
    }

    pub fn set_failing(&self, ids: impl IntoIterator<Item = u64>) {
        *self.failing.lock().unwrap() = ids.into_iter().map(ItemId::from).collect();
    }

    /// Every invocation, successful or not.
    pub fn attempts(&self) -> Vec<TriggerPayload> {
        self.attempts.lock().unwrap().clone()
    }

    /// `(item, from, to)` for every successful invocation.
    pub fn fired(&self) -> Vec<(ItemId, EntityStatus, EntityStatus)> {
        let failing = self.failing.lock().unwrap();
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !failing.contains(&p.item_id))
            .map(|p| (p.item_id.clone(), p.from, p.to))
            .collect()
    }
}

#[async_trait]
impl TriggerHandler for RecordingHandler {
    async fn invoke(&self, payload: TriggerPayload) -> Result<(), HandlerError> {
        let fails = self.failing.lock().unwrap().contains(&payload.item_id);
        self.attempts.lock().unwrap().push(payload);
        if fails {
            Err(HandlerError::new("injected handler failure"))
        } else {
            Ok(())
        }
    }
}

/// In-memory store whose next `n` persists fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryWatchStore,
    persist_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_persists(&self, n: u32) {
        self.persist_failures.store(n, Ordering::SeqCst);
    }
}

impl WatchStore for FlakyStore {
    fn create_or_resume(&self, id: &WatchId, config: &WatchConfig) -> StoreResult<WatchRecord> {
        self.inner.create_or_resume(id, config)
    }

    fn persist(&self, id: &WatchId, snapshot: &WatchSnapshot) -> StoreResult<WatchRecord> {
        let injected = self
            .persist_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Io(io::Error::other("injected persist failure")));
        }
        self.inner.persist(id, snapshot)
    }

    fn delete(&self, id: &WatchId) -> StoreResult<bool> {
        self.inner.delete(id)
    }

    fn load(&self, id: &WatchId) -> StoreResult<Option<WatchRecord>> {
        self.inner.load(id)
    }

    fn list(&self) -> StoreResult<Vec<WatchId>> {
        self.inner.list()
    }
}
