use rusqlite::{Row, params};
use serde::Serialize;

use super::{Store, new_id, now_iso8601};
use crate::error::AppError;
use crate::llm::MessageRole;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let role = role.parse::<MessageRole>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Store {
    pub fn append_message(&self, conversation_id: &str, role: MessageRole, content: &str) -> Result<Message, AppError> {
        let msg = Message {
            id: new_id(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now_iso8601(),
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![msg.id, msg.conversation_id, msg.role.as_str(), msg.content, msg.created_at],
        )
        .map_err(|e| AppError::Store(format!("append_message: {e}")))?;
        Ok(msg)
    }

    /// Oldest first. Insertion order breaks timestamp ties.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, role, content, created_at FROM messages
                 WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| AppError::Store(format!("prepare list_messages: {e}")))?;
        let rows = stmt
            .query_map(params![conversation_id], message_from_row)
            .map_err(|e| AppError::Store(format!("list_messages: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Store(format!("list_messages row: {e}")))
    }
}
