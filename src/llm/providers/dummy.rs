//! Dummy LLM provider: echoes the last user message prefixed with `[echo]`.
//! Used for offline development and for exercising the full chat round-trip
//! without an API key.

use tokio::sync::mpsc;

use crate::llm::{ChatMessage, MessageRole, ProviderError, StreamEvent};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    fn reply_for(messages: &[ChatMessage]) -> String {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        format!("[echo] {last}")
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        Ok(Self::reply_for(messages))
    }

    /// Streams the echo one word at a time, keeping the separating spaces.
    pub async fn chat_stream(&self, messages: &[ChatMessage], tx: mpsc::Sender<StreamEvent>) {
        let reply = Self::reply_for(messages);
        for word in reply.split_inclusive(' ') {
            if tx.send(StreamEvent::Delta(word.to_string())).await.is_err() {
                return;
            }
        }
        let _ = tx.send(StreamEvent::Done).await;
    }

    /// First six words of the message.
    pub fn generate_title(&self, first_message: &str) -> String {
        first_message.split_whitespace().take(6).collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_echoes_last_user_message() {
        let p = DummyProvider;
        let msgs = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("[echo] first"),
            ChatMessage::user("hello"),
        ];
        assert_eq!(p.chat(&msgs).await.unwrap(), "[echo] hello");
    }

    #[tokio::test]
    async fn chat_without_user_turn() {
        assert_eq!(DummyProvider.chat(&[]).await.unwrap(), "[echo] ");
    }

    #[tokio::test]
    async fn stream_reassembles_to_chat_reply() {
        let (tx, mut rx) = mpsc::channel(16);
        DummyProvider.chat_stream(&[ChatMessage::user("a b c")], tx).await;
        let mut text = String::new();
        let mut done = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                StreamEvent::Delta(d) => text.push_str(&d),
                StreamEvent::Done => done = true,
                StreamEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(done);
        assert_eq!(text, "[echo] a b c");
    }

    #[test]
    fn title_is_first_six_words() {
        let t = DummyProvider.generate_title("one two three four five six seven eight");
        assert_eq!(t, "one two three four five six");
    }
}
