//! JSON persistence for the desktop state.
//!
//! Only the long-lived parts are written: workspaces (with widget data),
//! the active workspace, and the focus-mode chat. Windows, mode and edit
//! state always start fresh.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, DesktopState, Workspace};
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Persisted {
    workspaces: Vec<Workspace>,
    active_workspace_id: String,
    #[serde(default)]
    focus_chat_messages: Vec<ChatMessage>,
    #[serde(default)]
    current_chat_id: Option<String>,
}

impl DesktopState {
    /// Write the persisted subset to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let snapshot = Persisted {
            workspaces: self.workspaces.clone(),
            active_workspace_id: self.active_workspace_id.clone(),
            focus_chat_messages: self.focus_chat_messages.clone(),
            current_chat_id: self.current_chat_id.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| AppError::Desktop(format!("cannot encode state: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Desktop(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        // Write then rename so a crash never leaves a truncated file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| AppError::Desktop(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| AppError::Desktop(format!("cannot write {}: {e}", path.display())))?;
        debug!(path = %path.display(), "desktop state saved");
        Ok(())
    }

    /// Load state from `path`. A missing file yields the default state.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no saved desktop state");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AppError::Desktop(format!("cannot read {}: {e}", path.display())));
            }
        };
        let saved: Persisted = serde_json::from_str(&text)
            .map_err(|e| AppError::Desktop(format!("invalid state file {}: {e}", path.display())))?;

        let mut state = Self::default();
        if !saved.workspaces.is_empty() {
            state.workspaces = saved.workspaces;
        }
        state.active_workspace_id = if state.workspace(&saved.active_workspace_id).is_some() {
            saved.active_workspace_id
        } else {
            state.workspaces[0].id.clone()
        };
        state.focus_chat_messages = saved.focus_chat_messages;
        state.current_chat_id = saved.current_chat_id;
        Ok(state)
    }
}
