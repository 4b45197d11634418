//! Clipboard history for the clipboard widget.

use serde::{Deserialize, Serialize};

use super::{new_id, now_ms};

pub const MAX_CLIPBOARD_ITEMS: usize = 20;
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ClipboardKind,
    /// Text, or a data URL for images.
    pub content: String,
    pub timestamp: i64,
    pub preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipboardHistory {
    items: Vec<ClipboardItem>,
}

impl ClipboardHistory {
    /// Record a clipboard change. Content already in the history is ignored.
    pub fn record(&mut self, kind: ClipboardKind, content: impl Into<String>) -> bool {
        let content = content.into();
        if self.items.iter().any(|i| i.content == content) {
            return false;
        }
        let preview = match kind {
            ClipboardKind::Text => content.chars().take(PREVIEW_CHARS).collect(),
            ClipboardKind::Image => content.clone(),
        };
        self.items.insert(
            0,
            ClipboardItem { id: new_id(), kind, content, timestamp: now_ms(), preview },
        );
        self.items.truncate(MAX_CLIPBOARD_ITEMS);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[ClipboardItem] {
        &self.items
    }
}
