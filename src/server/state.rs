//! Read-only views of persisted watch state.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use super::AppState;
use crate::persistence::{StoreError, WatchRecord};
use crate::types::{InvalidWatchId, WatchId};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no state for watch {0}")]
    NotFound(WatchId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    InvalidId(#[from] InvalidWatchId),
}

impl IntoResponse for StateError {
    fn into_response(self) -> Response {
        let status = match &self {
            StateError::NotFound(_) => StatusCode::NOT_FOUND,
            StateError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StateError::InvalidId(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

/// One entry of the watch listing.
#[derive(Debug, Serialize)]
pub struct WatchSummary {
    pub id: WatchId,
    /// True while the watch has a live executor in this process.
    pub registered: bool,
}

/// Returns a watch's persisted record: config, snapshot and round count.
///
/// - 200 with the record as JSON
/// - 400 if `id` is not a valid watch id
/// - 404 if nothing is persisted for `id`
pub async fn state_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WatchRecord>, StateError> {
    let id = WatchId::parse(id)?;
    match app_state.store().load(&id)? {
        Some(record) => Ok(Json(record)),
        None => Err(StateError::NotFound(id)),
    }
}

pub async fn list_handler(
    State(app_state): State<AppState>,
) -> Result<Json<Vec<WatchSummary>>, StateError> {
    let ids = app_state.store().list()?;
    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        let registered = app_state.registry().contains(&id).await;
        summaries.push(WatchSummary { id, registered });
    }
    Ok(Json(summaries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let id = WatchId::parse("w").unwrap();
        assert_eq!(
            StateError::NotFound(id).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StateError::from(WatchId::parse("..").unwrap_err())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StateError::Store(StoreError::Poisoned)
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
