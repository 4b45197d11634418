use rusqlite::{OptionalExtension, Row, params};

use super::{Store, new_id, now_iso8601};
use crate::error::AppError;

/// Stored OAuth grant for a third-party provider. Tokens never leave the API.
#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
}

const INTEGRATION_COLUMNS: &str =
    "id, user_id, provider, access_token, refresh_token, expires_at, created_at, updated_at";

fn integration_from_row(row: &Row<'_>) -> rusqlite::Result<Integration> {
    Ok(Integration {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl Store {
    /// One row per `(user, provider)`: replaces the tokens when it exists.
    pub fn upsert_integration(&self, user_id: &str, new: &NewIntegration) -> Result<Integration, AppError> {
        let now = now_iso8601();
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Store(format!("begin upsert_integration: {e}")))?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, created_at FROM integrations WHERE user_id = ?1 AND provider = ?2",
                params![user_id, new.provider],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(|e| AppError::Store(format!("upsert_integration lookup: {e}")))?;

        let (id, created_at) = match existing {
            Some((id, created_at)) => {
                tx.execute(
                    "UPDATE integrations SET access_token = ?1, refresh_token = ?2, expires_at = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![new.access_token, new.refresh_token, new.expires_at, now, id],
                )
                .map_err(|e| AppError::Store(format!("upsert_integration update: {e}")))?;
                (id, created_at)
            }
            None => {
                let id = new_id();
                tx.execute(
                    &format!("INSERT INTO integrations ({INTEGRATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                    params![
                        id,
                        user_id,
                        new.provider,
                        new.access_token,
                        new.refresh_token,
                        new.expires_at,
                        now,
                        now,
                    ],
                )
                .map_err(|e| AppError::Store(format!("upsert_integration insert: {e}")))?;
                (id, now.clone())
            }
        };

        tx.commit()
            .map_err(|e| AppError::Store(format!("commit upsert_integration: {e}")))?;

        Ok(Integration {
            id,
            user_id: user_id.to_string(),
            provider: new.provider.clone(),
            access_token: new.access_token.clone(),
            refresh_token: new.refresh_token.clone(),
            expires_at: new.expires_at.clone(),
            created_at,
            updated_at: now,
        })
    }

    pub fn list_integrations(&self, user_id: &str) -> Result<Vec<Integration>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE user_id = ?1 ORDER BY provider ASC"
            ))
            .map_err(|e| AppError::Store(format!("prepare list_integrations: {e}")))?;
        let rows = stmt
            .query_map(params![user_id], integration_from_row)
            .map_err(|e| AppError::Store(format!("list_integrations: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Store(format!("list_integrations row: {e}")))
    }

    pub fn delete_integration(&self, user_id: &str, provider: &str) -> Result<bool, AppError> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "DELETE FROM integrations WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider],
            )
            .map_err(|e| AppError::Store(format!("delete_integration: {e}")))?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::store_with_user;
    use super::*;

    fn slack(token: &str) -> NewIntegration {
        NewIntegration {
            provider: "slack".into(),
            access_token: token.into(),
            refresh_token: Some("refresh".into()),
            expires_at: Some("2026-12-31T00:00:00.000Z".into()),
        }
    }

    #[test]
    fn upsert_replaces_tokens_in_place() {
        let (store, user) = store_with_user("user_i");
        let first = store.upsert_integration(&user.id, &slack("t1")).unwrap();
        let second = store.upsert_integration(&user.id, &slack("t2")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let all = store.list_integrations(&user.id).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].access_token, "t2");
    }

    #[test]
    fn delete_by_provider() {
        let (store, user) = store_with_user("user_i");
        store.upsert_integration(&user.id, &slack("t1")).unwrap();
        assert!(store.delete_integration(&user.id, "slack").unwrap());
        assert!(!store.delete_integration(&user.id, "slack").unwrap());
        assert!(store.list_integrations(&user.id).unwrap().is_empty());
    }
}
