//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations. Every
//! chat call gets [`SYSTEM_PROMPT`] prepended by the provider, so callers only
//! pass the conversation turns.
//!
//! Provider instances are shared immutable capabilities; clone them freely.

pub mod providers;
pub(crate) mod sse;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub const SYSTEM_PROMPT: &str = "You are Sable, an intelligent AI assistant. You are helpful, harmless, and honest.
You provide clear, accurate, and well-structured responses.
When appropriate, use markdown formatting for better readability.
For code, always specify the language for syntax highlighting.";

/// Appended to the system prompt when the caller enables web search.
pub const SEARCH_PROMPT: &str = "You can look things up on the web. When a question needs current or \
external information, reply with only [SEARCH: <query>] and you will receive the results.";

pub const TITLE_PROMPT: &str = "Generate a short title (3-6 words) for a conversation that starts with \
the following message. Only respond with the title, nothing else.";

pub const DEFAULT_TITLE: &str = "New Chat";
pub const MAX_TITLE_CHARS: usize = 100;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// One item of a streamed completion. A stream ends with exactly one
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Error(String),
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Groq(providers::groq::GroqProvider),
    Dummy(providers::dummy::DummyProvider),
}

impl LlmProvider {
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Groq(_) => "groq",
            LlmProvider::Dummy(_) => "dummy",
        }
    }

    /// One completion over `messages`. Returns the first choice's content,
    /// or `""` when the provider returned none.
    pub async fn chat(&self, messages: &[ChatMessage], web_search: bool) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Groq(p) => p.chat(messages, web_search).await,
            LlmProvider::Dummy(p) => p.chat(messages).await,
        }
    }

    /// Streaming completion. Deltas go to `tx`; the stream always ends with
    /// `Done` or `Error` unless the receiver is dropped first.
    pub async fn chat_stream(&self, messages: &[ChatMessage], tx: mpsc::Sender<StreamEvent>) {
        match self {
            LlmProvider::Groq(p) => p.chat_stream(messages, tx).await,
            LlmProvider::Dummy(p) => p.chat_stream(messages, tx).await,
        }
    }

    /// Short conversation title. Never fails: falls back to [`DEFAULT_TITLE`].
    pub async fn generate_title(&self, first_message: &str) -> String {
        let title = match self {
            LlmProvider::Groq(p) => p.generate_title(first_message).await,
            LlmProvider::Dummy(p) => Ok(p.generate_title(first_message)),
        };
        match title.map(|t| clean_title(&t)) {
            Ok(t) if !t.is_empty() => t,
            Ok(_) => DEFAULT_TITLE.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "title generation failed; using default");
                DEFAULT_TITLE.to_string()
            }
        }
    }
}

/// Strip whitespace and wrapping quotes, and cap at [`MAX_TITLE_CHARS`].
fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect()
}

/// Find a `[SEARCH: query]` marker in an assistant reply (case-insensitive).
/// Returns the trimmed query, or `None` when absent or empty.
pub fn parse_search_request(reply: &str) -> Option<String> {
    let lower = reply.to_ascii_lowercase();
    let mut from = 0;
    while let Some(rel) = lower[from..].find("[search:") {
        let start = from + rel + "[search:".len();
        let Some(end_rel) = reply[start..].find(']') else {
            return None;
        };
        let query = reply[start..start + end_rel].trim();
        if !query.is_empty() {
            return Some(query.to_string());
        }
        from = start + end_rel + 1;
    }
    None
}
