use std::collections::BTreeMap;

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::{Store, now_iso8601};
use crate::error::AppError;

pub const DEFAULT_THEME: &str = "dark";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub theme: String,
    pub default_model: String,
    pub shortcuts: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Default for Preferences {
    /// What a user without a stored row sees.
    fn default() -> Self {
        Self {
            user_id: None,
            theme: DEFAULT_THEME.into(),
            default_model: DEFAULT_MODEL.into(),
            shortcuts: BTreeMap::new(),
            updated_at: None,
        }
    }
}

/// Partial update: `None` fields keep their stored (or default) value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    pub theme: Option<String>,
    pub default_model: Option<String>,
    pub shortcuts: Option<BTreeMap<String, String>>,
}

impl Store {
    pub fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>, AppError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT theme, default_model, shortcuts, updated_at FROM preferences WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| AppError::Store(format!("get_preferences: {e}")))?;

        row.map(|(theme, default_model, shortcuts, updated_at)| {
            let shortcuts = serde_json::from_str(&shortcuts)
                .map_err(|e| AppError::Store(format!("get_preferences: bad shortcuts json: {e}")))?;
            Ok(Preferences {
                user_id: Some(user_id.to_string()),
                theme,
                default_model,
                shortcuts,
                updated_at: Some(updated_at),
            })
        })
        .transpose()
    }

    /// Apply `patch` in one statement. Columns the patch leaves out are
    /// never written, so concurrent patches on different fields both land.
    pub fn upsert_preferences(&self, user_id: &str, patch: &PreferencesPatch) -> Result<Preferences, AppError> {
        let shortcuts_json = patch
            .shortcuts
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Store(format!("serialize shortcuts: {e}")))?;
        let conn = self.conn()?;
        let (theme, default_model, shortcuts, updated_at) = conn
            .query_row(
                "INSERT INTO preferences (user_id, theme, default_model, shortcuts, updated_at)
                 VALUES (?1, COALESCE(?2, ?6), COALESCE(?3, ?7), COALESCE(?4, '{}'), ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    theme = COALESCE(?2, theme),
                    default_model = COALESCE(?3, default_model),
                    shortcuts = COALESCE(?4, shortcuts),
                    updated_at = excluded.updated_at
                 RETURNING theme, default_model, shortcuts, updated_at",
                params![
                    user_id,
                    patch.theme,
                    patch.default_model,
                    shortcuts_json,
                    now_iso8601(),
                    DEFAULT_THEME,
                    DEFAULT_MODEL
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map_err(|e| AppError::Store(format!("upsert_preferences: {e}")))?;
        let shortcuts = serde_json::from_str(&shortcuts)
            .map_err(|e| AppError::Store(format!("upsert_preferences: bad shortcuts json: {e}")))?;
        Ok(Preferences {
            user_id: Some(user_id.to_string()),
            theme,
            default_model,
            shortcuts,
            updated_at: Some(updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::store_with_user;
    use super::*;

    #[test]
    fn none_until_written() {
        let (store, user) = store_with_user("user_p");
        assert!(store.get_preferences(&user.id).unwrap().is_none());
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let (store, user) = store_with_user("user_p");
        let shortcuts = BTreeMap::from([("toggle".to_string(), "Ctrl+Space".to_string())]);
        store
            .upsert_preferences(&user.id, &PreferencesPatch { shortcuts: Some(shortcuts.clone()), ..Default::default() })
            .unwrap();
        store
            .upsert_preferences(&user.id, &PreferencesPatch { theme: Some("light".into()), ..Default::default() })
            .unwrap();

        let prefs = store.get_preferences(&user.id).unwrap().unwrap();
        assert_eq!(prefs.theme, "light");
        assert_eq!(prefs.default_model, DEFAULT_MODEL);
        assert_eq!(prefs.shortcuts, shortcuts);
    }

    #[test]
    fn concurrent_patches_on_different_fields_both_survive() {
        let (store, user) = store_with_user("user_p");
        let shortcuts = BTreeMap::from([("search".to_string(), "Alt+S".to_string())]);

        for round in 0..25 {
            let theme = if round % 2 == 0 { "light" } else { "dark" };
            std::thread::scope(|s| {
                s.spawn(|| {
                    store
                        .upsert_preferences(&user.id, &PreferencesPatch { theme: Some(theme.into()), ..Default::default() })
                        .unwrap();
                });
                s.spawn(|| {
                    store
                        .upsert_preferences(
                            &user.id,
                            &PreferencesPatch { shortcuts: Some(shortcuts.clone()), ..Default::default() },
                        )
                        .unwrap();
                });
            });
            let prefs = store.get_preferences(&user.id).unwrap().unwrap();
            assert_eq!(prefs.theme, theme);
            assert_eq!(prefs.shortcuts, shortcuts);
            assert_eq!(prefs.default_model, DEFAULT_MODEL);
        }
    }

    #[test]
    fn patch_returns_merged_row() {
        let (store, user) = store_with_user("user_p");
        store
            .upsert_preferences(&user.id, &PreferencesPatch { default_model: Some("m".into()), ..Default::default() })
            .unwrap();
        let prefs = store
            .upsert_preferences(&user.id, &PreferencesPatch { theme: Some("light".into()), ..Default::default() })
            .unwrap();
        assert_eq!(prefs.theme, "light");
        assert_eq!(prefs.default_model, "m");
        assert!(prefs.shortcuts.is_empty());
        assert_eq!(prefs.user_id.as_deref(), Some(user.id.as_str()));
    }

    #[test]
    fn default_serializes_without_ids() {
        let json = serde_json::to_value(Preferences::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "theme": "dark", "defaultModel": "llama-3.3-70b-versatile", "shortcuts": {} })
        );
    }
}
