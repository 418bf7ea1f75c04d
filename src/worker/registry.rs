//! Maps running watches to their config and handler.
//!
//! The registry is the only state shared between watch loops. A watch checks
//! it at the start of every round; a missing entry means the watch was torn
//! down and the loop ends quietly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::handler::TriggerHandler;
use crate::types::{WatchConfig, WatchId};

/// What a watch needs to run a round.
#[derive(Clone)]
pub struct Executor {
    pub config: Arc<WatchConfig>,
    pub handler: Arc<dyn TriggerHandler>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Concurrent map from watch id to [`Executor`].
///
/// Constructed explicitly and shared via `Arc`; there is no global instance.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<WatchId, Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the executor for a watch. Returns the previous one.
    pub async fn register(
        &self,
        id: WatchId,
        config: WatchConfig,
        handler: Arc<dyn TriggerHandler>,
    ) -> Option<Executor> {
        debug!(watch = %id, "Registering executor");
        let executor = Executor {
            config: Arc::new(config),
            handler,
        };
        self.executors.write().await.insert(id, executor)
    }

    pub async fn lookup(&self, id: &WatchId) -> Option<Executor> {
        self.executors.read().await.get(id).cloned()
    }

    /// Removes a watch. Returns false if it was not registered.
    pub async fn unregister(&self, id: &WatchId) -> bool {
        let removed = self.executors.write().await.remove(id).is_some();
        if removed {
            debug!(watch = %id, "Unregistered executor");
        }
        removed
    }

    pub async fn contains(&self, id: &WatchId) -> bool {
        self.executors.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.executors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executors.read().await.is_empty()
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<WatchId> {
        let mut ids: Vec<_> = self.executors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::LoggingHandler;
    use chrono::Utc;

    fn watch_id(s: &str) -> WatchId {
        WatchId::parse(s).unwrap()
    }

    fn config(project: &str) -> WatchConfig {
        WatchConfig::new(project, Utc::now())
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let registry = ExecutorRegistry::new();
        let id = watch_id("w1");

        assert!(registry.lookup(&id).await.is_none());
        assert!(
            registry
                .register(id.clone(), config("octocat"), Arc::new(LoggingHandler))
                .await
                .is_none()
        );

        let executor = registry.lookup(&id).await.unwrap();
        assert_eq!(executor.config.project_name, "octocat");
        assert!(registry.contains(&id).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn register_replaces_previous() {
        let registry = ExecutorRegistry::new();
        let id = watch_id("w1");

        registry
            .register(id.clone(), config("first"), Arc::new(LoggingHandler))
            .await;
        let previous = registry
            .register(id.clone(), config("second"), Arc::new(LoggingHandler))
            .await
            .unwrap();

        assert_eq!(previous.config.project_name, "first");
        assert_eq!(
            registry.lookup(&id).await.unwrap().config.project_name,
            "second"
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_makes_lookup_miss() {
        let registry = ExecutorRegistry::new();
        let id = watch_id("w1");
        registry
            .register(id.clone(), config("octocat"), Arc::new(LoggingHandler))
            .await;

        assert!(registry.unregister(&id).await);
        assert!(!registry.unregister(&id).await);
        assert!(registry.lookup(&id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_registration_and_lookup() {
        let registry = Arc::new(ExecutorRegistry::new());

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let id = watch_id(&format!("w{}", i));
                    registry
                        .register(id.clone(), config("octocat"), Arc::new(LoggingHandler))
                        .await;
                    registry.lookup(&id).await.is_some()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(registry.len().await, 20);
        assert_eq!(registry.ids().await.len(), 20);
    }
}
