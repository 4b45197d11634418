//! Bearer-token authentication.
//!
//! The JWT payload is decoded without signature verification and its `sub`
//! claim identifies the user. The user row is created on first sight.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use tracing::{debug, warn};

use super::AppState;
use super::error::ApiError;
use crate::store::NewUser;

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub workos_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
}

impl Claims {
    /// Profile for a first-time user. Requires a non-empty `sub`.
    pub fn to_new_user(&self) -> Option<NewUser> {
        let sub = self.sub.as_deref().filter(|s| !s.is_empty())?;
        let name = self.first_name.as_deref().filter(|f| !f.is_empty()).map(|first| {
            format!("{first} {}", self.last_name.as_deref().unwrap_or("")).trim().to_string()
        });
        Some(NewUser {
            workos_id: sub.to_string(),
            email: self
                .email
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("{sub}@users.sable.invalid")),
            name,
            avatar_url: self.profile_picture_url.clone().filter(|u| !u.is_empty()),
        })
    }
}

/// Decode the middle segment of a three-part JWT. Accepts base64url or
/// standard alphabets, padded or not.
pub fn decode_jwt_payload(token: &str) -> Option<Claims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let segment = parts[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Middleware: reject unauthenticated requests, attach [`AuthUser`] otherwise.
pub async fn require_user(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let Some(token) = header.strip_prefix("Bearer ") else {
        return ApiError::Unauthorized("Missing authorization header").into_response();
    };
    if token.is_empty() {
        return ApiError::Unauthorized("Invalid token format").into_response();
    }

    let Some(new_user) = decode_jwt_payload(token).and_then(|c| c.to_new_user()) else {
        debug!("rejecting undecodable bearer token");
        return ApiError::Unauthorized("Invalid token").into_response();
    };

    let user = match state.store.get_or_create_user(&new_user) {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, subject = %new_user.workos_id, "auth user lookup failed");
            return ApiError::Unauthorized("Authentication failed").into_response();
        }
    };

    req.extensions_mut().insert(AuthUser {
        id: user.id,
        workos_id: user.workos_id,
        email: user.email,
        name: user.name,
    });
    next.run(req).await
}

#[cfg(test)]
pub(crate) fn test_token(claims: serde_json::Value) -> String {
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("eyJhbGciOiJSUzI1NiJ9.{payload}.sig")
}
