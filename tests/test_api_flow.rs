//! End-to-end API flows through the public router with mocked Groq and
//! Tavily backends.

use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sable::api::{AppState, build_router};
use sable::config::Config;
use sable::llm::providers;
use sable::search::SearchClient;
use sable::store::Store;

// ── helpers ──────────────────────────────────────────────────────────────────

fn token(sub: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = json!({ "sub": sub, "email": format!("{sub}@example.com"), "first_name": "Ada" });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("Bearer {header}.{payload}.sig")
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

struct App {
    _tmp: TempDir,
    state: AppState,
}

/// App backed by a file store and Groq/Tavily clients pointed at `server`.
fn app(server: &MockServer, with_search: bool) -> App {
    app_at(&server.uri(), with_search)
}

fn app_at(base: &str, with_search: bool) -> App {
    let tmp = TempDir::new().expect("tempdir");
    let mut config = Config::test_default(tmp.path());
    config.llm.groq.api_base_url = format!("{base}/openai/v1/chat/completions");
    config.search.api_url = format!("{base}/search");

    let store = Store::open(&config.database_path).expect("open store");
    let llm = providers::build("groq", &config.llm.groq, Some("gsk_test".into())).expect("build provider");
    let key = with_search.then(|| "tvly-test".to_string());
    let search = SearchClient::new(&config.search, key).expect("search client");
    App { state: AppState::new(&config, store, llm, search), _tmp: tmp }
}

async fn call(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", token("user_ada"));
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = build_router(state.clone()).oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn mount_title(server: &MockServer, title: &str) {
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "llama-3.1-8b-instant" })))
        .respond_with(completion(title))
        .with_priority(1)
        .mount(server)
        .await;
}

fn stream_request(conversation_id: &str) -> Request<Body> {
    let body = json!({
        "conversationId": conversation_id,
        "messages": [{ "role": "user", "content": "Tell me a story" }],
    });
    Request::builder()
        .method(Method::POST)
        .uri("/api/chat/stream")
        .header("authorization", token("user_ada"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// `data:` payloads of an SSE body, in order.
fn sse_frames(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| d.trim_start().to_string())
        .collect()
}

fn groq_chunk(content: &str) -> String {
    format!("data: {}\n\n", json!({ "choices": [{ "delta": { "content": content } }] }))
}

async fn new_conversation(state: &AppState) -> String {
    let (status, conv) = call(state, Method::POST, "/api/conversations", Some(json!({ "title": "Story" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    conv["id"].as_str().unwrap().to_string()
}

async fn stored_roles(state: &AppState, id: &str) -> Vec<Value> {
    let (_, conv) = call(state, Method::GET, &format!("/api/conversations/{id}"), None).await;
    conv["messages"].as_array().unwrap().iter().map(|m| m["role"].clone()).collect()
}

/// One-shot upstream that sends `first`, holds the connection until `release`
/// fires, then sends `rest` and closes.
async fn stalling_upstream(first: String, rest: String) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            req.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&req).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let len = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if req.len() >= end + 4 + len {
                    break;
                }
            }
        }

        let chunk = |s: &str| format!("{:x}\r\n{s}\r\n", s.len());
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        sock.write_all(format!("{head}{}", chunk(&first)).as_bytes()).await.unwrap();
        sock.flush().await.unwrap();
        let _ = release_rx.await;
        let _ = sock.write_all(format!("{}0\r\n\r\n", chunk(&rest)).as_bytes()).await;
        let _ = sock.flush().await;
    });
    (format!("http://{addr}"), release_tx)
}

// ── chat ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_creates_titled_conversation_and_persists_turn() {
    let server = MockServer::start().await;
    mount_title(&server, "\"Trip planning\"").await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(completion("Pack light."))
        .mount(&server)
        .await;
    let app = app(&server, false);

    let (status, body) = call(
        &app.state,
        Method::POST,
        "/api/chat",
        Some(json!({ "messages": [{ "role": "user", "content": "Help me plan a trip" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "Pack light.");
    let id = body["conversationId"].as_str().unwrap().to_string();

    let (status, conv) = call(&app.state, Method::GET, &format!("/api/conversations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conv["title"], "Trip planning");
    let messages = conv["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["content"], "Pack light.");
}

#[tokio::test]
async fn web_search_marker_triggers_second_completion() {
    let server = MockServer::start().await;
    mount_title(&server, "Rust news").await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(body_string_contains("Please provide a helpful response based on these search results."))
        .respond_with(completion("Rust 1.90 shipped this week."))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(completion("[SEARCH: latest rust release]"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(json!({ "query": "latest rust release", "api_key": "tvly-test" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": "latest rust release",
            "answer": "Rust 1.90",
            "results": [{
                "title": "Announcing Rust 1.90",
                "url": "https://blog.rust-lang.org/",
                "content": "The Rust team is happy to announce...",
                "score": 0.98
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    let app = app(&server, true);

    let (status, body) = call(
        &app.state,
        Method::POST,
        "/api/chat",
        Some(json!({
            "messages": [{ "role": "user", "content": "What is the latest Rust release?" }],
            "webSearch": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "Rust 1.90 shipped this week.");
}

#[tokio::test]
async fn provider_failure_is_generic_500() {
    let server = MockServer::start().await;
    mount_title(&server, "Title").await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "message": "upstream exploded" }
        })))
        .mount(&server)
        .await;
    let app = app(&server, false);

    let (status, body) = call(
        &app.state,
        Method::POST,
        "/api/chat",
        Some(json!({ "messages": [{ "role": "user", "content": "hi" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to generate response" }));
}

// ── search ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_relays_deltas_and_stores_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(format!("{}{}data: [DONE]\n\n", groq_chunk("Once "), groq_chunk("upon"))),
        )
        .mount(&server)
        .await;
    let app = app(&server, false);
    let id = new_conversation(&app.state).await;

    let resp = build_router(app.state.clone()).oneshot(stream_request(&id)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let frames = sse_frames(&to_bytes(resp.into_body(), usize::MAX).await.unwrap());
    assert_eq!(
        frames,
        [
            json!({ "conversationId": id }).to_string(),
            json!({ "content": "Once " }).to_string(),
            json!({ "content": "upon" }).to_string(),
            "[DONE]".to_string(),
        ]
    );

    let (_, conv) = call(&app.state, Method::GET, &format!("/api/conversations/{id}"), None).await;
    assert_eq!(conv["messages"][1]["content"], "Once upon");
}

#[tokio::test]
async fn stream_cut_short_ends_with_error_frame_and_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(groq_chunk("Once ")),
        )
        .mount(&server)
        .await;
    let app = app(&server, false);
    let id = new_conversation(&app.state).await;

    let resp = build_router(app.state.clone()).oneshot(stream_request(&id)).await.unwrap();
    let frames = sse_frames(&to_bytes(resp.into_body(), usize::MAX).await.unwrap());
    assert_eq!(frames.last().unwrap(), &json!({ "error": "Stream failed" }).to_string());
    assert!(!frames.contains(&"[DONE]".to_string()));
    assert_eq!(stored_roles(&app.state, &id).await, [json!("user")]);
}

#[tokio::test]
async fn stream_provider_error_object_ends_with_error_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(format!(
                    "{}data: {}\n\n",
                    groq_chunk("Once "),
                    json!({ "error": { "message": "rate limited" } })
                )),
        )
        .mount(&server)
        .await;
    let app = app(&server, false);
    let id = new_conversation(&app.state).await;

    let resp = build_router(app.state.clone()).oneshot(stream_request(&id)).await.unwrap();
    let frames = sse_frames(&to_bytes(resp.into_body(), usize::MAX).await.unwrap());
    assert_eq!(frames.last().unwrap(), &json!({ "error": "Stream failed" }).to_string());
    assert_eq!(stored_roles(&app.state, &id).await, [json!("user")]);
}

#[tokio::test]
async fn client_disconnect_mid_stream_discards_assistant_turn() {
    let (base, release) = stalling_upstream(groq_chunk("Once "), format!("{}data: [DONE]\n\n", groq_chunk("upon"))).await;
    let app = app_at(&base, false);
    let id = new_conversation(&app.state).await;

    let resp = build_router(app.state.clone()).oneshot(stream_request(&id)).await.unwrap();
    let mut body = resp.into_body().into_data_stream();
    let mut seen = Vec::new();
    while !String::from_utf8_lossy(&seen).contains("\"content\"") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("first content frame")
            .expect("body open")
            .unwrap();
        seen.extend_from_slice(&chunk);
    }
    drop(body);

    // Let the upstream finish; the reply must still not be stored.
    let _ = release.send(());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(stored_roles(&app.state, &id).await, [json!("user")]);
}

#[tokio::test]
async fn search_route_proxies_tavily() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": "sqlite wal",
            "results": [{ "title": "WAL", "url": "https://sqlite.org/wal.html", "content": "Write-ahead log", "score": 0.9 }]
        })))
        .mount(&server)
        .await;
    let app = app(&server, true);

    let (status, body) = call(&app.state, Method::POST, "/api/search", Some(json!({ "query": "sqlite wal" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["url"], "https://sqlite.org/wal.html");
}

#[tokio::test]
async fn search_provider_error_is_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;
    let app = app(&server, true);

    let (status, body) = call(&app.state, Method::POST, "/api/search", Some(json!({ "query": "x" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Search failed");
}

// ── user data lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn user_profile_and_conversation_lifecycle() {
    let server = MockServer::start().await;
    let app = app(&server, false);

    let (status, user) = call(&app.state, Method::GET, "/api/user", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["email"], "user_ada@example.com");
    assert_eq!(user["name"], "Ada");
    assert_eq!(user["preferences"]["theme"], "dark");

    let (status, _) = call(
        &app.state,
        Method::PUT,
        "/api/user/preferences",
        Some(json!({ "theme": "light", "shortcuts": { "newChat": "Ctrl+N" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, user) = call(&app.state, Method::GET, "/api/user", None).await;
    assert_eq!(user["preferences"]["theme"], "light");
    assert_eq!(user["preferences"]["defaultModel"], "llama-3.3-70b-versatile");
    assert_eq!(user["preferences"]["shortcuts"]["newChat"], "Ctrl+N");

    for title in ["first", "second", "third"] {
        let (status, _) = call(&app.state, Method::POST, "/api/conversations", Some(json!({ "title": title }))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (_, list) = call(&app.state, Method::GET, "/api/conversations?limit=2", None).await;
    assert_eq!(list["limit"], 2);
    let titles: Vec<_> = list["conversations"].as_array().unwrap().iter().map(|c| c["title"].clone()).collect();
    assert_eq!(titles, [json!("third"), json!("second")]);

    let (status, _) = call(&app.state, Method::DELETE, "/api/conversations", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app.state, Method::DELETE, "/api/conversations?confirm=true", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, list) = call(&app.state, Method::GET, "/api/conversations", None).await;
    assert!(list["conversations"].as_array().unwrap().is_empty());
}
