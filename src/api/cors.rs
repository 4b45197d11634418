//! CORS for the browser and desktop clients.
//!
//! Known origins (exact match or allowed host suffix) are echoed back with
//! credentials allowed; anything else gets `*`.

use axum::{
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS, ORIGIN, VARY,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::config::CorsConfig;

const ALLOW_METHODS: &str = "GET,HEAD,PUT,POST,DELETE,PATCH";
const DEFAULT_ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// `Some(origin)` when the origin should be echoed, `None` for `*`.
pub fn resolve_origin<'a>(config: &CorsConfig, origin: Option<&'a str>) -> Option<&'a str> {
    let origin = origin.filter(|o| !o.is_empty())?;
    let known = config.allowed_origins.iter().any(|o| o == origin)
        || config
            .allowed_origin_suffixes
            .iter()
            .any(|suffix| origin.ends_with(suffix.as_str()));
    known.then_some(origin)
}

fn apply(headers: &mut HeaderMap, echoed: Option<&str>) {
    match echoed.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(value) => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
            headers.insert(VARY, HeaderValue::from_static("Origin"));
        }
        None => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
    }
}

pub async fn cors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let echoed = resolve_origin(&state.cors, origin.as_deref()).map(str::to_string);

    if req.method() == Method::OPTIONS {
        let allow_headers = req
            .headers()
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or(HeaderValue::from_static(DEFAULT_ALLOW_HEADERS));
        let mut resp = StatusCode::NO_CONTENT.into_response();
        let headers = resp.headers_mut();
        apply(headers, echoed.as_deref());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        return resp;
    }

    let mut resp = next.run(req).await;
    apply(resp.headers_mut(), echoed.as_deref());
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CorsConfig {
        CorsConfig {
            allowed_origins: vec!["http://localhost:5173".into()],
            allowed_origin_suffixes: vec![".vercel.app".into()],
        }
    }

    #[test]
    fn exact_and_suffix_origins_echoed() {
        let c = config();
        assert_eq!(resolve_origin(&c, Some("http://localhost:5173")), Some("http://localhost:5173"));
        assert_eq!(
            resolve_origin(&c, Some("https://sable-git-main.vercel.app")),
            Some("https://sable-git-main.vercel.app")
        );
    }

    #[test]
    fn unknown_or_missing_origin_is_wildcard() {
        let c = config();
        assert_eq!(resolve_origin(&c, Some("https://evil.example")), None);
        assert_eq!(resolve_origin(&c, None), None);
        assert_eq!(resolve_origin(&c, Some("")), None);
    }
}
