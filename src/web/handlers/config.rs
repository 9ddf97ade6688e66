//! Runtime configuration handed to the frontend.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use super::AppState;

/// Frontend runtime configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigResponse {
    /// Base URL of the API and viewer stream.
    pub backend_url: String,
}

/// GET /api/config
pub async fn get_runtime_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<RuntimeConfigResponse> {
    Json(RuntimeConfigResponse {
        backend_url: state.base_url(&headers),
    })
}
