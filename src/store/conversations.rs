use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use super::{Store, new_id, now_iso8601};
use crate::error::AppError;
use crate::llm::DEFAULT_TITLE;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

const CONVERSATION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl Store {
    /// Most recently updated first.
    pub fn list_conversations(&self, user_id: &str, limit: u32, offset: u32) -> Result<Vec<Conversation>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
            ))
            .map_err(|e| AppError::Store(format!("prepare list_conversations: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, limit, offset], conversation_from_row)
            .map_err(|e| AppError::Store(format!("list_conversations: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Store(format!("list_conversations row: {e}")))
    }

    /// `None` when the conversation does not exist or belongs to someone else.
    pub fn get_conversation(&self, user_id: &str, id: &str) -> Result<Option<Conversation>, AppError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
            conversation_from_row,
        )
        .optional()
        .map_err(|e| AppError::Store(format!("get_conversation: {e}")))
    }

    pub fn create_conversation(&self, user_id: &str, title: Option<&str>) -> Result<Conversation, AppError> {
        let now = now_iso8601();
        let conv = Conversation {
            id: new_id(),
            user_id: user_id.to_string(),
            title: title.unwrap_or(DEFAULT_TITLE).to_string(),
            created_at: now.clone(),
            updated_at: now,
        };
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO conversations ({CONVERSATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![conv.id, conv.user_id, conv.title, conv.created_at, conv.updated_at],
        )
        .map_err(|e| AppError::Store(format!("create_conversation: {e}")))?;
        Ok(conv)
    }

    pub fn rename_conversation(&self, user_id: &str, id: &str, title: &str) -> Result<Option<Conversation>, AppError> {
        {
            let conn = self.conn()?;
            let n = conn
                .execute(
                    "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                    params![title, now_iso8601(), id, user_id],
                )
                .map_err(|e| AppError::Store(format!("rename_conversation: {e}")))?;
            if n == 0 {
                return Ok(None);
            }
        }
        self.get_conversation(user_id, id)
    }

    /// Bump `updated_at` so the conversation sorts first.
    pub fn touch_conversation(&self, id: &str) -> Result<(), AppError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now_iso8601(), id],
        )
        .map_err(|e| AppError::Store(format!("touch_conversation: {e}")))?;
        Ok(())
    }

    /// Returns `false` when nothing owned by `user_id` matched.
    pub fn delete_conversation(&self, user_id: &str, id: &str) -> Result<bool, AppError> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Store(format!("delete_conversation: {e}")))?;
        Ok(n > 0)
    }

    pub fn delete_all_conversations(&self, user_id: &str) -> Result<usize, AppError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])
            .map_err(|e| AppError::Store(format!("delete_all_conversations: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::store_with_user;
    use crate::llm::MessageRole;

    #[test]
    fn create_defaults_title() {
        let (store, user) = store_with_user("user_c");
        let conv = store.create_conversation(&user.id, None).unwrap();
        assert_eq!(conv.title, "New Chat");
        let titled = store.create_conversation(&user.id, Some("Trip plans")).unwrap();
        assert_eq!(titled.title, "Trip plans");
    }

    #[test]
    fn list_orders_by_updated_desc_and_pages() {
        let (store, user) = store_with_user("user_c");
        let first = store.create_conversation(&user.id, Some("first")).unwrap();
        let second = store.create_conversation(&user.id, Some("second")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.touch_conversation(&first.id).unwrap();

        let all = store.list_conversations(&user.id, 50, 0).unwrap();
        let titles: Vec<_> = all.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["first", "second"]);

        let page = store.list_conversations(&user.id, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, second.id);
    }

    #[test]
    fn ownership_scoped() {
        let (store, owner) = store_with_user("owner");
        let other = store
            .get_or_create_user(&crate::store::NewUser {
                workos_id: "intruder".into(),
                email: "intruder@example.com".into(),
                name: None,
                avatar_url: None,
            })
            .unwrap();
        let conv = store.create_conversation(&owner.id, None).unwrap();

        assert!(store.get_conversation(&other.id, &conv.id).unwrap().is_none());
        assert!(store.rename_conversation(&other.id, &conv.id, "x").unwrap().is_none());
        assert!(!store.delete_conversation(&other.id, &conv.id).unwrap());
        assert!(store.get_conversation(&owner.id, &conv.id).unwrap().is_some());
    }

    #[test]
    fn rename_updates_title() {
        let (store, user) = store_with_user("user_c");
        let conv = store.create_conversation(&user.id, None).unwrap();
        let renamed = store.rename_conversation(&user.id, &conv.id, "Renamed").unwrap().unwrap();
        assert_eq!(renamed.title, "Renamed");
    }

    #[test]
    fn delete_cascades_to_messages() {
        let (store, user) = store_with_user("user_c");
        let conv = store.create_conversation(&user.id, None).unwrap();
        store.append_message(&conv.id, MessageRole::User, "hello").unwrap();
        assert!(store.delete_conversation(&user.id, &conv.id).unwrap());
        assert!(store.list_messages(&conv.id).unwrap().is_empty());
    }

    #[test]
    fn delete_all_only_touches_owner() {
        let (store, user) = store_with_user("user_c");
        store.create_conversation(&user.id, None).unwrap();
        store.create_conversation(&user.id, None).unwrap();
        assert_eq!(store.delete_all_conversations(&user.id).unwrap(), 2);
        assert!(store.list_conversations(&user.id, 50, 0).unwrap().is_empty());
    }
}
