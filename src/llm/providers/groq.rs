//! Groq chat completion provider (OpenAI-compatible `/chat/completions`).
//!
//! All wire types are private to this module. The provider is stateless:
//! conversation history is passed in on every call.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::config::GroqConfig;
use crate::llm::{ChatMessage, ProviderError, SEARCH_PROMPT, SYSTEM_PROMPT, StreamEvent, TITLE_PROMPT, sse};

const TITLE_TEMPERATURE: f32 = 0.5;
const TITLE_MAX_TOKENS: u32 = 20;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Adapter for Groq's OpenAI-compatible endpoint.
///
/// Constructed once at startup, then cheaply cloned because `reqwest::Client`
/// is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct GroqProvider {
    /// Whole-request timeout; used for non-streaming calls.
    client: Client,
    /// Connect timeout only. Streams are bounded by the idle timeout instead.
    stream_client: Client,
    config: GroqConfig,
    api_key: Option<String>,
}

impl GroqProvider {
    pub fn new(config: GroqConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, stream_client, config, api_key })
    }

    fn request_messages(messages: &[ChatMessage], system: String) -> Vec<WireMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(WireMessage { role: "system".into(), content: system });
        out.extend(messages.iter().map(|m| WireMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));
        out
    }

    fn post(&self, client: &Client, payload: &ChatCompletionRequest) -> reqwest::RequestBuilder {
        let mut req = client.post(&self.config.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn complete(&self, payload: ChatCompletionRequest) -> Result<String, ProviderError> {
        debug!(
            model = %payload.model,
            temperature = payload.temperature,
            messages = payload.messages.len(),
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let response = self.post(&self.client, &payload).send().await.map_err(|e| {
            error!(url = %self.config.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received LLM response");

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    /// One chat completion with the system prompt prepended.
    pub async fn chat(&self, messages: &[ChatMessage], web_search: bool) -> Result<String, ProviderError> {
        let system = if web_search {
            format!("{SYSTEM_PROMPT}\n{SEARCH_PROMPT}")
        } else {
            SYSTEM_PROMPT.to_string()
        };
        self.complete(ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: Self::request_messages(messages, system),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        })
        .await
    }

    /// Streamed chat completion; see [`crate::llm::LlmProvider::chat_stream`].
    pub async fn chat_stream(&self, messages: &[ChatMessage], tx: mpsc::Sender<StreamEvent>) {
        let payload = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: Self::request_messages(messages, SYSTEM_PROMPT.to_string()),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: true,
        };
        debug!(model = %payload.model, messages = payload.messages.len(), "opening LLM stream");

        let response = match self.post(&self.stream_client, &payload).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(url = %self.config.api_base_url, error = %e, "LLM stream request failed (transport)");
                let _ = tx.send(StreamEvent::Error(format!("Request failed: {e}"))).await;
                return;
            }
        };

        let response = match check_status(response).await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        };

        let idle = Duration::from_secs(self.config.stream_idle_timeout_seconds);
        sse::process_sse_stream(response.bytes_stream(), &tx, idle).await;
    }

    /// Title for a conversation opened with `first_message`, from the small model.
    pub async fn generate_title(&self, first_message: &str) -> Result<String, ProviderError> {
        let payload = ChatCompletionRequest {
            model: self.config.title_model.clone(),
            messages: Self::request_messages(&[ChatMessage::user(first_message)], TITLE_PROMPT.to_string()),
            temperature: TITLE_TEMPERATURE,
            max_tokens: TITLE_MAX_TOKENS,
            stream: false,
        };
        Ok(self.complete(payload).await?.trim().to_string())
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI-compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut cut = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...(truncated)");
    }

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}
