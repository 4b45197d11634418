//! Flow mode: floating chat windows.

use serde::{Deserialize, Serialize};

use super::{ChatMessage, DesktopState, Position, Size, new_id};
use crate::llm::MessageRole;

pub const DEFAULT_CHAT_SIZE: Size = Size::new(380.0, 500.0);

/// Offset applied per already-open window when cascading new ones.
const CASCADE_STEP: f64 = 30.0;
/// Windows never open closer than this to the top-left screen edge.
const MIN_EDGE: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatWindow {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub is_minimized: bool,
    pub position: Position,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowBackup {
    pub chat_windows: Vec<ChatWindow>,
    pub active_chat_id: Option<String>,
}

impl DesktopState {
    pub fn create_chat_window(&mut self) -> String {
        let offset = self.chat_windows.len() as f64 * CASCADE_STEP;
        let position = Position {
            x: ((self.screen_size.width - DEFAULT_CHAT_SIZE.width) / 2.0 + offset).max(MIN_EDGE),
            y: ((self.screen_size.height - DEFAULT_CHAT_SIZE.height) / 2.0 + offset).max(MIN_EDGE),
        };
        let id = new_id();
        self.chat_windows.push(ChatWindow {
            id: id.clone(),
            messages: Vec::new(),
            is_minimized: false,
            position,
            size: DEFAULT_CHAT_SIZE,
        });
        self.active_chat_id = Some(id.clone());
        self.is_docked = false;
        id
    }

    pub fn close_chat_window(&mut self, id: &str) {
        self.chat_windows.retain(|w| w.id != id);
        self.active_chat_id = self.chat_windows.last().map(|w| w.id.clone());
        self.is_docked = self.chat_windows.is_empty();
    }

    pub fn minimize_chat_window(&mut self, id: &str) -> bool {
        self.with_window(id, |w| w.is_minimized = true)
    }

    pub fn restore_chat_window(&mut self, id: &str) -> bool {
        let found = self.with_window(id, |w| w.is_minimized = false);
        // Mirrors the overlay: the id becomes active even if the window is gone.
        self.active_chat_id = Some(id.to_string());
        found
    }

    pub fn update_chat_position(&mut self, id: &str, position: Position) -> bool {
        self.with_window(id, |w| w.position = position)
    }

    pub fn update_chat_size(&mut self, id: &str, size: Size) -> bool {
        self.with_window(id, |w| w.size = size)
    }

    /// Append a message to a window. Returns the new message id, or `None`
    /// when the window does not exist.
    pub fn add_message(&mut self, chat_id: &str, role: MessageRole, content: impl Into<String>) -> Option<String> {
        let window = self.chat_windows.iter_mut().find(|w| w.id == chat_id)?;
        let message = ChatMessage::new(role, content);
        let id = message.id.clone();
        window.messages.push(message);
        Some(id)
    }

    pub fn update_message(&mut self, chat_id: &str, message_id: &str, content: impl Into<String>) -> bool {
        let Some(message) = self
            .chat_windows
            .iter_mut()
            .find(|w| w.id == chat_id)
            .and_then(|w| w.messages.iter_mut().find(|m| m.id == message_id))
        else {
            return false;
        };
        message.content = content.into();
        true
    }

    pub fn set_active_chat(&mut self, id: Option<&str>) {
        self.active_chat_id = id.map(str::to_string);
    }

    pub fn set_docked(&mut self, docked: bool) {
        self.is_docked = docked;
    }

    fn with_window(&mut self, id: &str, f: impl FnOnce(&mut ChatWindow)) -> bool {
        match self.chat_windows.iter_mut().find(|w| w.id == id) {
            Some(w) => {
                f(w);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cascade_from_centre() {
        let mut s = DesktopState::default();
        let a = s.create_chat_window();
        let b = s.create_chat_window();
        assert!(!s.is_docked);
        assert_eq!(s.active_chat_id.as_deref(), Some(b.as_str()));

        let pa = s.chat_windows[0].position;
        let pb = s.chat_windows[1].position;
        assert_eq!(pa, Position { x: 770.0, y: 290.0 });
        assert_eq!(pb, Position { x: 800.0, y: 320.0 });
        assert_eq!(s.chat_windows[0].id, a);
    }

    #[test]
    fn small_screen_clamps_to_edge() {
        let mut s = DesktopState::default();
        s.set_screen_size(Size::new(300.0, 400.0));
        s.create_chat_window();
        assert_eq!(s.chat_windows[0].position, Position { x: 50.0, y: 50.0 });
    }

    #[test]
    fn closing_moves_focus_to_last_window() {
        let mut s = DesktopState::default();
        let a = s.create_chat_window();
        let b = s.create_chat_window();
        let c = s.create_chat_window();
        s.close_chat_window(&c);
        assert_eq!(s.active_chat_id.as_deref(), Some(b.as_str()));
        s.close_chat_window(&a);
        s.close_chat_window(&b);
        assert!(s.active_chat_id.is_none());
        assert!(s.is_docked);
    }

    #[test]
    fn minimize_and_restore() {
        let mut s = DesktopState::default();
        let a = s.create_chat_window();
        let b = s.create_chat_window();
        assert!(s.minimize_chat_window(&a));
        assert!(s.chat_windows[0].is_minimized);
        assert!(s.restore_chat_window(&a));
        assert!(!s.chat_windows[0].is_minimized);
        assert_eq!(s.active_chat_id.as_deref(), Some(a.as_str()));
        assert!(!s.minimize_chat_window("missing"));
        s.set_active_chat(Some(&b));
        assert_eq!(s.active_chat_id.as_deref(), Some(b.as_str()));
    }

    #[test]
    fn messages_append_and_update() {
        let mut s = DesktopState::default();
        let chat = s.create_chat_window();
        let msg = s.add_message(&chat, MessageRole::Assistant, "").unwrap();
        assert!(s.update_message(&chat, &msg, "streamed text"));
        assert_eq!(s.chat_windows[0].messages[0].content, "streamed text");
        assert!(!s.update_message(&chat, "nope", "x"));
        assert!(s.add_message("nope", MessageRole::User, "x").is_none());
    }

    #[test]
    fn geometry_updates() {
        let mut s = DesktopState::default();
        let chat = s.create_chat_window();
        assert!(s.update_chat_position(&chat, Position { x: 1.0, y: 2.0 }));
        assert!(s.update_chat_size(&chat, Size::new(400.0, 600.0)));
        assert_eq!(s.chat_windows[0].size, Size::new(400.0, 600.0));
        assert_eq!(s.chat_windows[0].position.y, 2.0);
    }
}
