//! HTTP API served with axum under `/api/`.
//!
//! ## URL layout
//!
//! ```text
//! GET    /api/health
//! POST   /api/chat                         auth, chat limit
//! POST   /api/chat/stream                  auth, chat limit (SSE)
//! GET    /api/conversations?limit&offset   auth
//! POST   /api/conversations                auth
//! DELETE /api/conversations?confirm=true   auth
//! GET    /api/conversations/{id}           auth
//! PATCH  /api/conversations/{id}           auth
//! DELETE /api/conversations/{id}           auth
//! POST   /api/search                       auth, search limit
//! GET    /api/user                         auth
//! PATCH  /api/user                         auth
//! PUT    /api/user/preferences             auth
//! GET    /api/user/integrations            auth
//! DELETE /api/user/integrations/{provider} auth
//! ```

pub mod auth;
mod chat;
mod conversations;
pub mod cors;
pub mod error;
pub mod rate_limit;
mod search;
mod user;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, CorsConfig};
use crate::error::AppError;
use crate::llm::LlmProvider;
use crate::search::SearchClient;
use crate::store::Store;
use error::ApiError;
use rate_limit::RateLimiter;

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone: all fields are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub llm: LlmProvider,
    pub search: SearchClient,
    pub chat_limiter: Arc<RateLimiter>,
    pub search_limiter: Arc<RateLimiter>,
    pub cors: Arc<CorsConfig>,
}

impl AppState {
    pub fn new(config: &Config, store: Store, llm: LlmProvider, search: SearchClient) -> Self {
        let window = Duration::from_secs(config.rate_limit.window_seconds);
        Self {
            store,
            llm,
            search,
            chat_limiter: Arc::new(RateLimiter::new(config.rate_limit.chat_per_window, window)),
            search_limiter: Arc::new(RateLimiter::new(config.rate_limit.search_per_window, window)),
            cors: Arc::new(config.cors.clone()),
        }
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

pub async fn serve(bind_addr: &str, state: AppState, shutdown: CancellationToken) -> Result<(), AppError> {
    let router = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("server error: {e}")))?;

    info!("api shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    let require_user = || from_fn_with_state(state.clone(), auth::require_user);

    // `route_layer`s run last-added first, so auth resolves the user before
    // the limiter keys on it.
    let chat_routes = Router::new()
        .route("/api/chat",        post(chat::chat))
        .route("/api/chat/stream", post(chat::chat_stream))
        .route_layer(from_fn_with_state(state.clone(), rate_limit::chat_limit))
        .route_layer(require_user());

    let search_routes = Router::new()
        .route("/api/search", post(search::search))
        .route_layer(from_fn_with_state(state.clone(), rate_limit::search_limit))
        .route_layer(require_user());

    let resource_routes = Router::new()
        .route("/api/conversations",
            get(conversations::list).post(conversations::create).delete(conversations::delete_all))
        .route("/api/conversations/{id}",
            get(conversations::get).patch(conversations::rename).delete(conversations::delete_one))
        .route("/api/user",                         get(user::get_user).patch(user::update_profile))
        .route("/api/user/preferences",             put(user::update_preferences))
        .route("/api/user/integrations",            get(user::list_integrations))
        .route("/api/user/integrations/{provider}", delete(user::delete_integration))
        .route_layer(require_user());

    Router::new()
        .route("/api/health", get(health))
        .merge(chat_routes)
        .merge(search_routes)
        .merge(resource_routes)
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), cors::cors))
        .with_state(state)
}

/// GET /api/health
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found")
}
