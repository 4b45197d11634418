//! Request bodies and their validation rules.
//!
//! [`ValidJson`] parses the body and runs [`Validate`]; any failure becomes a
//! 400 `Invalid request` carrying the reason.

use axum::{
    Json,
    extract::{FromRequest, Request},
};
use serde::{Deserialize, de::DeserializeOwned};

use super::error::ApiError;
use crate::llm::{ChatMessage, MessageRole};
use crate::store::PreferencesPatch;

pub const MAX_MESSAGE_CHARS: usize = 32_000;
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_QUERY_CHARS: usize = 500;
pub const MAX_NAME_CHARS: usize = 100;
const THEMES: [&str; 3] = ["light", "dark", "system"];

pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// JSON body extractor that also validates.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
        value.validate().map_err(ApiError::InvalidRequest)?;
        Ok(ValidJson(value))
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let n = value.chars().count();
    if n < min {
        return Err(format!("{field}: must be at least {min} character(s)"));
    }
    if n > max {
        return Err(format!("{field}: must be at most {max} characters"));
    }
    Ok(())
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub conversation_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub web_search: bool,
}

impl ChatRequest {
    /// First user turn, used for title generation.
    pub fn first_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

impl Validate for ChatRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.conversation_id {
            uuid::Uuid::parse_str(id).map_err(|_| "conversationId: must be a UUID".to_string())?;
        }
        if self.messages.is_empty() {
            return Err("messages: must contain at least 1 message".into());
        }
        for (i, m) in self.messages.iter().enumerate() {
            check_len(&format!("messages[{i}].content"), &m.content, 1, MAX_MESSAGE_CHARS)?;
        }
        Ok(())
    }
}

// ── Conversations ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

impl Validate for CreateConversationRequest {
    fn validate(&self) -> Result<(), String> {
        match &self.title {
            Some(t) => check_len("title", t, 1, MAX_TITLE_CHARS),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

impl Validate for RenameConversationRequest {
    fn validate(&self) -> Result<(), String> {
        check_len("title", &self.title, 1, MAX_TITLE_CHARS)
    }
}

// ── Search ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

impl Validate for SearchRequest {
    fn validate(&self) -> Result<(), String> {
        check_len("query", &self.query, 1, MAX_QUERY_CHARS)
    }
}

// ── User ──────────────────────────────────────────────────────────────────────

impl Validate for PreferencesPatch {
    fn validate(&self) -> Result<(), String> {
        match self.theme.as_deref() {
            Some(theme) if !THEMES.contains(&theme) => {
                Err(format!("theme: expected one of light, dark, system, got '{theme}'"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub name: Option<String>,
}

impl Validate for ProfileRequest {
    fn validate(&self) -> Result<(), String> {
        match &self.name {
            Some(n) => check_len("name", n, 1, MAX_NAME_CHARS),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(json: serde_json::Value) -> ChatRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn chat_accepts_minimal_body() {
        let req = chat(serde_json::json!({ "messages": [{ "role": "user", "content": "hi" }] }));
        assert!(req.validate().is_ok());
        assert!(!req.web_search);
        assert_eq!(req.first_user_message(), Some("hi"));
    }

    #[test]
    fn chat_rejects_empty_messages_and_content() {
        assert!(chat(serde_json::json!({ "messages": [] })).validate().is_err());
        let req = chat(serde_json::json!({ "messages": [{ "role": "user", "content": "" }] }));
        assert!(req.validate().unwrap_err().contains("messages[0].content"));
    }

    #[test]
    fn chat_rejects_oversized_content() {
        let big = "x".repeat(MAX_MESSAGE_CHARS + 1);
        let req = chat(serde_json::json!({ "messages": [{ "role": "user", "content": big }] }));
        assert!(req.validate().is_err());
    }

    #[test]
    fn chat_rejects_non_uuid_conversation() {
        let req = chat(serde_json::json!({
            "conversationId": "abc",
            "messages": [{ "role": "user", "content": "hi" }]
        }));
        assert!(req.validate().unwrap_err().contains("conversationId"));
    }

    #[test]
    fn unknown_role_fails_to_parse() {
        let parsed: Result<ChatRequest, _> =
            serde_json::from_value(serde_json::json!({ "messages": [{ "role": "tool", "content": "x" }] }));
        assert!(parsed.is_err());
    }

    #[test]
    fn title_bounds() {
        assert!(RenameConversationRequest { title: String::new() }.validate().is_err());
        assert!(RenameConversationRequest { title: "t".repeat(100) }.validate().is_ok());
        assert!(RenameConversationRequest { title: "t".repeat(101) }.validate().is_err());
        assert!(CreateConversationRequest { title: None }.validate().is_ok());
    }

    #[test]
    fn query_and_name_bounds() {
        assert!(SearchRequest { query: "q".repeat(501) }.validate().is_err());
        assert!(ProfileRequest { name: Some(String::new()) }.validate().is_err());
        assert!(ProfileRequest { name: None }.validate().is_ok());
    }

    #[test]
    fn theme_must_be_known() {
        let bad = PreferencesPatch { theme: Some("neon".into()), ..Default::default() };
        assert!(bad.validate().is_err());
        let ok = PreferencesPatch { theme: Some("system".into()), ..Default::default() };
        assert!(ok.validate().is_ok());
    }
}
