//! Desktop overlay state.
//!
//! Flow mode is a set of floating chat windows; focus mode is a set of
//! workspaces holding widgets. [`DesktopState`] owns both plus the single
//! focus-mode chat, and every mutation is an explicit method. Operations
//! on an unknown id leave the state untouched and return `false`.

pub mod clipboard;
pub mod console;
pub mod flow;
pub mod notifications;
pub mod persist;
pub mod workspace;

use serde::{Deserialize, Serialize};

use crate::llm::MessageRole;

pub use clipboard::{ClipboardHistory, ClipboardItem, ClipboardKind};
pub use flow::{ChatWindow, DEFAULT_CHAT_SIZE, FlowBackup};
pub use notifications::{FeedNotification, NotificationFeed, NotificationGroup, NotificationSource};
pub use workspace::{Widget, WidgetType, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Flow,
    Focus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl ChatMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self { id: new_id(), role, content: content.into(), timestamp: now_ms() }
    }
}

pub const DEFAULT_SCREEN: Size = Size::new(1920.0, 1080.0);

#[derive(Debug, Clone, PartialEq)]
pub struct DesktopState {
    pub mode: Mode,
    pub screen_size: Size,

    pub chat_windows: Vec<ChatWindow>,
    pub active_chat_id: Option<String>,
    pub is_docked: bool,
    pub flow_backup: Option<FlowBackup>,

    pub workspaces: Vec<Workspace>,
    pub active_workspace_id: String,
    pub is_edit_mode: bool,
    pub focus_chat_messages: Vec<ChatMessage>,
    pub current_chat_id: Option<String>,
}

impl Default for DesktopState {
    fn default() -> Self {
        let workspace = Workspace::default_workspace();
        Self {
            mode: Mode::Flow,
            screen_size: DEFAULT_SCREEN,
            chat_windows: Vec::new(),
            active_chat_id: None,
            is_docked: true,
            flow_backup: None,
            active_workspace_id: workspace.id.clone(),
            workspaces: vec![workspace],
            is_edit_mode: false,
            focus_chat_messages: Vec::new(),
            current_chat_id: None,
        }
    }
}

impl DesktopState {
    pub fn set_screen_size(&mut self, size: Size) {
        self.screen_size = size;
    }

    /// Switch between flow and focus mode.
    ///
    /// Entering focus mode backs up the chat windows and carries the first
    /// visible window's messages into the focus chat. Leaving it restores the
    /// backup, with the focus chat's messages written back to the first
    /// window.
    pub fn toggle_focus_mode(&mut self) {
        match self.mode {
            Mode::Flow => {
                self.flow_backup = Some(FlowBackup {
                    chat_windows: self.chat_windows.clone(),
                    active_chat_id: self.active_chat_id.clone(),
                });
                if let Some(visible) = self.chat_windows.iter().find(|w| !w.is_minimized) {
                    self.focus_chat_messages = visible.messages.clone();
                }
                self.mode = Mode::Focus;
                self.chat_windows.clear();
                self.is_docked = true;
            }
            Mode::Focus => {
                if let Some(backup) = self.flow_backup.take() {
                    let mut windows = backup.chat_windows;
                    if let Some(first) = windows.first_mut()
                        && !self.focus_chat_messages.is_empty()
                    {
                        first.messages = self.focus_chat_messages.clone();
                    }
                    self.is_docked = windows.is_empty();
                    self.chat_windows = windows;
                    self.active_chat_id = backup.active_chat_id;
                }
                self.mode = Mode::Flow;
                self.is_edit_mode = false;
            }
        }
    }

    pub fn add_focus_chat_message(&mut self, role: MessageRole, content: impl Into<String>) -> String {
        let message = ChatMessage::new(role, content);
        let id = message.id.clone();
        self.focus_chat_messages.push(message);
        id
    }

    pub fn clear_focus_chat_messages(&mut self) {
        self.focus_chat_messages.clear();
        self.current_chat_id = None;
    }
}

pub(crate) fn new_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(13);
    id
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
