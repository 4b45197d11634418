//! `POST /api/search`.

use axum::{Json, extract::State};
use tracing::error;

use super::AppState;
use super::error::ApiError;
use super::validate::{SearchRequest, ValidJson};
use crate::search::SearchResponse;

pub(super) async fn search(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if !state.search.is_configured() {
        return Err(ApiError::Unavailable {
            error: "Search not configured",
            message: "Tavily API key is not set",
        });
    }
    state.search.search_web(&req.query).await.map(Json).map_err(|e| {
        error!(error = %e, "search failed");
        ApiError::Failed("Search failed")
    })
}
