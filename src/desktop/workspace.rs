//! Focus mode: workspaces and their widgets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{DesktopState, Position, Size, new_id};

pub const DEFAULT_WORKSPACE_ID: &str = "workspace-1";
pub const DEFAULT_WORKSPACE_NAME: &str = "Workspace 1";

pub const FALLBACK_WIDGET_SIZE: Size = Size::new(220.0, 200.0);
pub const FALLBACK_MIN_SIZE: Size = Size::new(150.0, 100.0);

/// Gap kept between a new widget and the screen edges.
const PLACEMENT_MARGIN: f64 = 100.0;
const PLACEMENT_STEP: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetType {
    Chat,
    StickyNote,
    Todo,
    Weather,
    Clipboard,
    Calendar,
    Notifications,
}

impl WidgetType {
    pub const ALL: [WidgetType; 7] = [
        Self::Chat,
        Self::StickyNote,
        Self::Todo,
        Self::Weather,
        Self::Clipboard,
        Self::Calendar,
        Self::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::StickyNote => "sticky-note",
            Self::Todo => "todo",
            Self::Weather => "weather",
            Self::Clipboard => "clipboard",
            Self::Calendar => "calendar",
            Self::Notifications => "notifications",
        }
    }

    /// Size a freshly added widget gets.
    pub fn default_size(&self) -> Size {
        match self {
            Self::Chat => Size::new(280.0, 420.0),
            Self::Clipboard => Size::new(260.0, 320.0),
            Self::Notifications => Size::new(320.0, 400.0),
            Self::StickyNote => Size::new(200.0, 180.0),
            Self::Calendar => Size::new(300.0, 380.0),
            Self::Weather => Size::new(260.0, 300.0),
            Self::Todo => Size::new(300.0, 400.0),
        }
    }

    /// Smallest size a resize may produce.
    pub fn min_size(&self) -> Size {
        match self {
            Self::Chat => Size::new(220.0, 300.0),
            Self::Clipboard => Size::new(200.0, 200.0),
            Self::Notifications => Size::new(280.0, 300.0),
            Self::StickyNote => Size::new(140.0, 100.0),
            Self::Calendar => Size::new(260.0, 320.0),
            Self::Weather => Size::new(220.0, 260.0),
            Self::Todo => FALLBACK_MIN_SIZE,
        }
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WidgetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown widget type: '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WidgetType,
    pub position: Position,
    pub size: Size,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

impl Workspace {
    pub fn default_workspace() -> Self {
        Self {
            id: DEFAULT_WORKSPACE_ID.to_string(),
            name: DEFAULT_WORKSPACE_NAME.to_string(),
            widgets: Vec::new(),
        }
    }

    pub fn widget(&self, id: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.id == id)
    }
}

impl DesktopState {
    pub fn workspace(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == id)
    }

    pub fn active_workspace(&self) -> Option<&Workspace> {
        self.workspace(&self.active_workspace_id)
    }

    pub fn set_active_workspace(&mut self, id: &str) {
        self.active_workspace_id = id.to_string();
    }

    /// Append `Workspace N` and make it active.
    pub fn create_workspace(&mut self) -> String {
        let id = new_id();
        self.workspaces.push(Workspace {
            id: id.clone(),
            name: format!("Workspace {}", self.workspaces.len() + 1),
            widgets: Vec::new(),
        });
        self.active_workspace_id = id.clone();
        id
    }

    /// Remove a workspace. The first remaining one becomes active, and the
    /// default workspace is recreated when none remain.
    pub fn delete_workspace(&mut self, id: &str) {
        self.workspaces.retain(|w| w.id != id);
        if self.workspaces.is_empty() {
            self.workspaces.push(Workspace::default_workspace());
        }
        self.active_workspace_id = self.workspaces[0].id.clone();
    }

    pub fn rename_workspace(&mut self, id: &str, name: impl Into<String>) -> bool {
        match self.workspaces.iter_mut().find(|w| w.id == id) {
            Some(ws) => {
                ws.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn toggle_edit_mode(&mut self) {
        self.is_edit_mode = !self.is_edit_mode;
    }

    pub fn set_edit_mode(&mut self, editing: bool) {
        self.is_edit_mode = editing;
    }

    /// Add a widget to `workspace_id`, sized from the registry unless `size`
    /// is given. Returns `None` for an unknown workspace.
    pub fn add_widget(
        &mut self,
        workspace_id: &str,
        kind: WidgetType,
        data: Map<String, Value>,
        size: Option<Size>,
    ) -> Option<String> {
        let size = size.unwrap_or_else(|| kind.default_size());
        let screen = self.screen_size;
        let ws = self.workspaces.iter_mut().find(|w| w.id == workspace_id)?;
        let position = place_widget(screen, size, ws.widgets.len());
        let id = new_id();
        ws.widgets.push(Widget { id: id.clone(), kind, position, size, data });
        Some(id)
    }

    pub fn remove_widget(&mut self, workspace_id: &str, widget_id: &str) -> bool {
        let Some(ws) = self.workspaces.iter_mut().find(|w| w.id == workspace_id) else {
            return false;
        };
        let before = ws.widgets.len();
        ws.widgets.retain(|w| w.id != widget_id);
        ws.widgets.len() != before
    }

    pub fn update_widget_position(&mut self, workspace_id: &str, widget_id: &str, position: Position) -> bool {
        self.with_widget(workspace_id, widget_id, |w| w.position = position)
    }

    /// Resize, never below the widget type's minimum size.
    pub fn update_widget_size(&mut self, workspace_id: &str, widget_id: &str, size: Size) -> bool {
        self.with_widget(workspace_id, widget_id, |w| {
            let min = w.kind.min_size();
            w.size = Size::new(size.width.max(min.width), size.height.max(min.height));
        })
    }

    /// Shallow-merge `data` into the widget's data.
    pub fn update_widget_data(&mut self, workspace_id: &str, widget_id: &str, data: Map<String, Value>) -> bool {
        self.with_widget(workspace_id, widget_id, |w| w.data.extend(data))
    }

    /// First widget of `kind` in the active workspace.
    pub fn find_active_widget(&self, kind: WidgetType) -> Option<&Widget> {
        self.active_workspace()?.widgets.iter().find(|w| w.kind == kind)
    }

    fn with_widget(&mut self, workspace_id: &str, widget_id: &str, f: impl FnOnce(&mut Widget)) -> bool {
        let widget = self
            .workspaces
            .iter_mut()
            .find(|w| w.id == workspace_id)
            .and_then(|ws| ws.widgets.iter_mut().find(|w| w.id == widget_id));
        match widget {
            Some(w) => {
                f(w);
                true
            }
            None => false,
        }
    }
}

/// Stagger new widgets inside the screen, keeping a margin on every side
/// when the screen is large enough.
fn place_widget(screen: Size, size: Size, index: usize) -> Position {
    let span_x = (screen.width - size.width - 2.0 * PLACEMENT_MARGIN).max(0.0);
    let span_y = (screen.height - size.height - 2.0 * PLACEMENT_MARGIN).max(0.0);
    let step = index as f64 * PLACEMENT_STEP;
    let x = if span_x > 0.0 { step % span_x } else { 0.0 };
    let y = if span_y > 0.0 { step % span_y } else { 0.0 };
    let max_x = (screen.width - size.width).max(0.0);
    let max_y = (screen.height - size.height).max(0.0);
    Position {
        x: (PLACEMENT_MARGIN + x).min(max_x),
        y: (PLACEMENT_MARGIN + y).min(max_y),
    }
}
