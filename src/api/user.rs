//! `/api/user` handlers: profile, preferences and connected integrations.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use super::AppState;
use super::auth::AuthUser;
use super::error::ApiError;
use super::validate::{ProfileRequest, ValidJson};
use crate::store::{Preferences, PreferencesPatch};

/// GET /api/user
pub(super) async fn get_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store
        .find_user(&user.id)?
        .ok_or_else(|| ApiError::Internal(format!("authenticated user {} vanished", user.id)))?;
    let preferences = state.store.get_preferences(&user.id)?.unwrap_or_else(Preferences::default);
    Ok(Json(json!({
        "id": record.id,
        "email": record.email,
        "name": record.name,
        "avatarUrl": record.avatar_url,
        "preferences": preferences,
    })))
}

/// PATCH /api/user
pub(super) async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<ProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(name) = req.name.as_deref() {
        state.store.update_user_name(&user.id, Some(name))?;
    }
    Ok(Json(json!({ "success": true })))
}

/// PUT /api/user/preferences
pub(super) async fn update_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ValidJson(patch): ValidJson<PreferencesPatch>,
) -> Result<Json<Value>, ApiError> {
    state.store.upsert_preferences(&user.id, &patch)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/user/integrations. Tokens stay server-side.
pub(super) async fn list_integrations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let integrations: Vec<Value> = state
        .store
        .list_integrations(&user.id)?
        .into_iter()
        .map(|i| json!({ "provider": i.provider, "expiresAt": i.expires_at, "connected": true }))
        .collect();
    Ok(Json(json!({ "integrations": integrations })))
}

/// DELETE /api/user/integrations/{provider}
pub(super) async fn delete_integration(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_integration(&user.id, &provider)? {
        return Err(ApiError::NotFound("Integration not found"));
    }
    Ok(Json(json!({ "success": true })))
}
