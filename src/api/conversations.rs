//! `/api/conversations` handlers. Every query is scoped to the caller.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::AppState;
use super::auth::AuthUser;
use super::error::ApiError;
use super::validate::{CreateConversationRequest, RenameConversationRequest, ValidJson};
use crate::store::{Conversation, Message};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 100;

/// Raw query strings, so a malformed number falls back instead of rejecting.
#[derive(Debug, Deserialize)]
pub(super) struct ListParams {
    limit: Option<String>,
    offset: Option<String>,
}

impl ListParams {
    fn resolve(&self) -> (u32, u32) {
        let limit = self
            .limit
            .as_deref()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT);
        let offset = self
            .offset
            .as_deref()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);
        (limit, offset)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ConfirmParams {
    confirm: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ConversationDetail {
    #[serde(flatten)]
    conversation: Conversation,
    messages: Vec<Message>,
}

/// GET /api/conversations
pub(super) async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let (limit, offset) = params.resolve();
    let conversations = state.store.list_conversations(&user.id, limit, offset)?;
    Ok(Json(json!({ "conversations": conversations, "limit": limit, "offset": offset })))
}

/// GET /api/conversations/{id}
pub(super) async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let conversation = state
        .store
        .get_conversation(&user.id, &id)?
        .ok_or(ApiError::NotFound("Conversation not found"))?;
    let messages = state.store.list_messages(&conversation.id)?;
    Ok(Json(ConversationDetail { conversation, messages }))
}

/// POST /api/conversations
pub(super) async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conv = state.store.create_conversation(&user.id, req.title.as_deref())?;
    Ok((StatusCode::CREATED, Json(conv)))
}

/// PATCH /api/conversations/{id}
pub(super) async fn rename(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<RenameConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    state
        .store
        .rename_conversation(&user.id, &id, &req.title)?
        .map(Json)
        .ok_or(ApiError::NotFound("Conversation not found"))
}

/// DELETE /api/conversations/{id}
pub(super) async fn delete_one(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_conversation(&user.id, &id)? {
        return Err(ApiError::NotFound("Conversation not found"));
    }
    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/conversations?confirm=true
pub(super) async fn delete_all(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ConfirmParams>,
) -> Result<Json<Value>, ApiError> {
    if params.confirm.as_deref() != Some("true") {
        return Err(ApiError::BadRequest {
            error: "Confirmation required",
            message: "Add ?confirm=true to delete all conversations",
        });
    }
    let removed = state.store.delete_all_conversations(&user.id)?;
    tracing::info!(user_id = %user.id, removed, "deleted all conversations");
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(limit: Option<&str>, offset: Option<&str>) -> ListParams {
        ListParams { limit: limit.map(String::from), offset: offset.map(String::from) }
    }

    #[test]
    fn list_params_defaults_and_clamps() {
        assert_eq!(params(None, None).resolve(), (50, 0));
        assert_eq!(params(Some("500"), Some("10")).resolve(), (100, 10));
        assert_eq!(params(Some("0"), None).resolve(), (1, 0));
        assert_eq!(params(Some("abc"), Some("-3")).resolve(), (50, 0));
    }
}
