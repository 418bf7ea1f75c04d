//! HTTP server for inspecting watches.
//!
//! # Endpoints
//!
//! - `GET /api/v1/watches` - Lists persisted watches and whether each is registered
//! - `GET /api/v1/watches/{id}/state` - Returns a watch's persisted record as JSON
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

pub mod health;
pub mod state;

pub use health::health_handler;
pub use state::{list_handler, state_handler};

use crate::persistence::WatchStore;
use crate::worker::ExecutorRegistry;

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn WatchStore>,
    registry: Arc<ExecutorRegistry>,
}

impl AppState {
    pub fn new(store: Arc<dyn WatchStore>, registry: Arc<ExecutorRegistry>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { store, registry }),
        }
    }

    pub fn store(&self) -> &dyn WatchStore {
        self.inner.store.as_ref()
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.inner.registry
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/api/v1/watches", get(list_handler))
        .route("/api/v1/watches/{id}/state", get(state_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
