//! Process-local sliding-window rate limiting.
//!
//! Each key keeps the timestamps of its accepted requests inside the window.
//! The caller key is the authenticated user id, else `x-forwarded-for`, else
//! `anonymous`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::AppState;
use super::auth::AuthUser;

const SWEEP_THRESHOLD: usize = 10_000;

static LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix milliseconds at which the oldest counted request leaves the window.
    pub reset_ms: i64,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window_ms: i64,
    hits: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, chrono::Utc::now().timestamp_millis())
    }

    /// Count one request for `key` at `now_ms` if the window has room.
    pub fn check_at(&self, key: &str, now_ms: i64) -> Decision {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cutoff = now_ms - self.window_ms;

        if hits.len() > SWEEP_THRESHOLD {
            hits.retain(|_, q| q.back().is_some_and(|&t| t > cutoff));
        }

        let queue = hits.entry(key.to_string()).or_default();
        while queue.front().is_some_and(|&t| t <= cutoff) {
            queue.pop_front();
        }

        let used = u32::try_from(queue.len()).unwrap_or(u32::MAX);
        let allowed = used < self.limit;
        if allowed {
            queue.push_back(now_ms);
        }
        let oldest = queue.front().copied().unwrap_or(now_ms);

        Decision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(used + u32::from(allowed)),
            reset_ms: oldest + self.window_ms,
        }
    }
}

fn caller_key(req: &Request) -> String {
    if let Some(user) = req.extensions().get::<AuthUser>() {
        return user.id.clone();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string())
}

fn apply_headers(headers: &mut HeaderMap, d: &Decision) {
    headers.insert(LIMIT_HEADER.clone(), HeaderValue::from(d.limit));
    headers.insert(REMAINING_HEADER.clone(), HeaderValue::from(d.remaining));
    headers.insert(RESET_HEADER.clone(), HeaderValue::from(d.reset_ms));
}

async fn enforce(limiter: &RateLimiter, message: &'static str, req: Request, next: Next) -> Response {
    let key = caller_key(&req);
    let decision = limiter.check(&key);

    if !decision.allowed {
        let now = chrono::Utc::now().timestamp_millis();
        let retry_after = u64::try_from(decision.reset_ms - now).unwrap_or(0).div_ceil(1000);
        warn!(%key, retry_after, "rate limit exceeded");
        let mut resp = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too many requests",
                "message": message,
                "retryAfter": retry_after,
            })),
        )
            .into_response();
        apply_headers(resp.headers_mut(), &decision);
        resp.headers_mut().insert(RETRY_AFTER, HeaderValue::from(retry_after));
        return resp;
    }

    debug!(%key, remaining = decision.remaining, "rate limit ok");
    let mut resp = next.run(req).await;
    apply_headers(resp.headers_mut(), &decision);
    resp
}

pub async fn chat_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(&state.chat_limiter, "Rate limit exceeded. Please try again later.", req, next).await
}

pub async fn search_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(&state.search_limiter, "Search rate limit exceeded. Please try again later.", req, next).await
}
