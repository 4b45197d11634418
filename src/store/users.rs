use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use super::{Store, new_id, now_iso8601};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// Identity-provider subject (`sub` claim).
    pub workos_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub workos_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

const USER_COLUMNS: &str = "id, workos_id, email, name, avatar_url, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        workos_id: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        avatar_url: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Store {
    pub fn find_user_by_subject(&self, subject: &str) -> Result<Option<User>, AppError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE workos_id = ?1"),
            params![subject],
            user_from_row,
        )
        .optional()
        .map_err(|e| AppError::Store(format!("find_user_by_subject: {e}")))
    }

    pub fn find_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(|e| AppError::Store(format!("find_user: {e}")))
    }

    pub fn create_user(&self, new: &NewUser) -> Result<User, AppError> {
        let now = now_iso8601();
        let user = User {
            id: new_id(),
            workos_id: new.workos_id.clone(),
            email: new.email.clone(),
            name: new.name.clone(),
            avatar_url: new.avatar_url.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                user.id,
                user.workos_id,
                user.email,
                user.name,
                user.avatar_url,
                user.created_at,
                user.updated_at,
            ],
        )
        .map_err(|e| AppError::Store(format!("create_user: {e}")))?;
        Ok(user)
    }

    /// Existing user for `new.workos_id`, or a freshly inserted one.
    pub fn get_or_create_user(&self, new: &NewUser) -> Result<User, AppError> {
        if let Some(user) = self.find_user_by_subject(&new.workos_id)? {
            return Ok(user);
        }
        match self.create_user(new) {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "created user");
                Ok(user)
            }
            // Lost a race with a concurrent first request for the same subject.
            Err(e) => self.find_user_by_subject(&new.workos_id)?.ok_or(e),
        }
    }

    /// Returns `false` when no such user exists.
    pub fn update_user_name(&self, id: &str, name: Option<&str>) -> Result<bool, AppError> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE users SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now_iso8601(), id],
            )
            .map_err(|e| AppError::Store(format!("update_user_name: {e}")))?;
        Ok(n > 0)
    }

    /// Removes the user and, through foreign keys, everything they own.
    pub fn delete_user(&self, id: &str) -> Result<bool, AppError> {
        let conn = self.conn()?;
        let n = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| AppError::Store(format!("delete_user: {e}")))?;
        Ok(n > 0)
    }
}
