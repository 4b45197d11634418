//! `POST /api/chat` and `POST /api/chat/stream`.

use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::State,
    response::sse::{Event, Sse},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::AppState;
use super::auth::AuthUser;
use super::error::ApiError;
use super::validate::{ChatRequest, ValidJson};
use crate::llm::{ChatMessage, DEFAULT_TITLE, MessageRole, StreamEvent, parse_search_request};
use crate::search::format_for_context;

const SSE_CHANNEL_CAPACITY: usize = 32;
const LLM_CHANNEL_CAPACITY: usize = 64;

fn chat_failed(e: impl std::fmt::Display) -> ApiError {
    error!(error = %e, "chat request failed");
    ApiError::Failed("Failed to generate response")
}

/// Resolve the target conversation (creating and titling a new one when no
/// id was given) and store the last input message.
async fn open_turn(state: &AppState, user: &AuthUser, req: &ChatRequest) -> Result<String, ApiError> {
    let conversation_id = match &req.conversation_id {
        Some(id) => state
            .store
            .get_conversation(&user.id, id)?
            .ok_or(ApiError::NotFound("Conversation not found"))?
            .id,
        None => {
            let first = req.first_user_message().unwrap_or(DEFAULT_TITLE);
            let title = state.llm.generate_title(first).await;
            let conv = state.store.create_conversation(&user.id, Some(&title))?;
            info!(conversation_id = %conv.id, %title, "created conversation");
            conv.id
        }
    };

    if let Some(last) = req.messages.last() {
        state
            .store
            .append_message(&conversation_id, last.role, &last.content)?;
    }
    Ok(conversation_id)
}

/// One completion, with a single search round-trip when the model asks for it.
async fn complete_with_search(state: &AppState, messages: &[ChatMessage], web_search: bool) -> Result<String, ApiError> {
    let search_enabled = web_search && state.search.is_configured();
    let reply = state
        .llm
        .chat(messages, search_enabled)
        .await
        .map_err(chat_failed)?;
    if !search_enabled {
        return Ok(reply);
    }
    let Some(query) = parse_search_request(&reply) else {
        return Ok(reply);
    };

    info!(%query, "model requested web search");
    let results = match state.search.search_web(&query).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "web search failed; returning first reply");
            return Ok(reply);
        }
    };

    let mut history = messages.to_vec();
    history.push(ChatMessage::assistant(format!("Searching for: {query}")));
    history.push(ChatMessage::user(format!(
        "{}\n\nPlease provide a helpful response based on these search results.",
        format_for_context(&results)
    )));
    state.llm.chat(&history, false).await.map_err(chat_failed)
}

/// POST /api/chat
pub(super) async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let conversation_id = open_turn(&state, &user, &req).await.map_err(|e| match e {
        ApiError::NotFound(_) => e,
        other => chat_failed(other),
    })?;

    let content = complete_with_search(&state, &req.messages, req.web_search).await?;

    state
        .store
        .append_message(&conversation_id, MessageRole::Assistant, &content)
        .map_err(chat_failed)?;
    state.store.touch_conversation(&conversation_id).map_err(chat_failed)?;

    Ok(Json(json!({ "conversationId": conversation_id, "content": content })))
}

/// POST /api/chat/stream
///
/// Frames: `{"conversationId"}`, then one `{"content"}` per delta, then
/// `[DONE]` once the reply is stored. Failures end with `{"error":"Stream failed"}`.
pub(super) async fn chat_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<ChatRequest>,
) -> Result<Sse<ReceiverStream<Result<Event, Infallible>>>, ApiError> {
    let conversation_id = open_turn(&state, &user, &req).await?;
    let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
    tokio::spawn(relay(state, conversation_id, req.messages, tx));
    Ok(Sse::new(ReceiverStream::new(rx)))
}

enum RelayOutcome {
    Completed,
    Failed(String),
    Disconnected,
}

fn data(payload: impl AsRef<str>) -> Result<Event, Infallible> {
    Ok(Event::default().data(payload))
}

async fn relay(
    state: AppState,
    conversation_id: String,
    messages: Vec<ChatMessage>,
    sse: mpsc::Sender<Result<Event, Infallible>>,
) {
    if sse
        .send(data(json!({ "conversationId": conversation_id }).to_string()))
        .await
        .is_err()
    {
        return;
    }

    let (llm_tx, mut llm_rx) = mpsc::channel(LLM_CHANNEL_CAPACITY);
    let llm = state.llm.clone();
    let producer = tokio::spawn(async move { llm.chat_stream(&messages, llm_tx).await });

    let mut full = String::new();
    let outcome = loop {
        let event = tokio::select! {
            ev = llm_rx.recv() => ev,
            _ = sse.closed() => break RelayOutcome::Disconnected,
        };
        match event {
            Some(StreamEvent::Delta(text)) => {
                full.push_str(&text);
                if sse.send(data(json!({ "content": text }).to_string())).await.is_err() {
                    break RelayOutcome::Disconnected;
                }
            }
            Some(StreamEvent::Done) => break RelayOutcome::Completed,
            Some(StreamEvent::Error(e)) => break RelayOutcome::Failed(e),
            None => break RelayOutcome::Failed("provider stream ended without completion".into()),
        }
    };

    match outcome {
        RelayOutcome::Disconnected => {
            producer.abort();
            info!(%conversation_id, streamed_bytes = full.len(), "client disconnected; assistant turn discarded");
        }
        RelayOutcome::Failed(e) => {
            error!(%conversation_id, error = %e, "stream failed");
            let _ = sse.send(data(json!({ "error": "Stream failed" }).to_string())).await;
        }
        RelayOutcome::Completed => {
            let saved = state
                .store
                .append_message(&conversation_id, MessageRole::Assistant, &full)
                .and_then(|_| state.store.touch_conversation(&conversation_id));
            match saved {
                Ok(()) => {
                    debug!(%conversation_id, bytes = full.len(), "stream completed");
                    let _ = sse.send(data("[DONE]")).await;
                }
                Err(e) => {
                    error!(%conversation_id, error = %e, "failed to store streamed reply");
                    let _ = sse.send(data(json!({ "error": "Stream failed" }).to_string())).await;
                }
            }
        }
    }
}
