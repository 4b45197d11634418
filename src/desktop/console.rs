//! Slash-command console over the desktop state and sidecar bridge.
//!
//! The `sable-desktop` binary feeds stdin lines to [`parse_command`] and
//! runs the result through [`Session::execute`]; sidecar events go through
//! [`Session::handle_event`].

use std::io::Write;
use std::path::PathBuf;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ClipboardHistory, ClipboardKind, DesktopState, Mode, NotificationFeed, WidgetType};
use crate::error::AppError;
use crate::sidecar::{CommandKind, SidecarCommand, SidecarEvent, SidecarManager, SidecarName};

/// Widget data key holding the notification feed.
pub const NOTIFICATIONS_KEY: &str = "notifications";
/// Widget data key holding the clipboard history.
pub const CLIPBOARD_KEY: &str = "items";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    SidecarStart(SidecarName),
    SidecarStop(SidecarName),
    SidecarSend { name: SidecarName, command: SidecarCommand },
    SidecarStatus,
    Notifications,
    Clipboard(String),
    WorkspaceNew,
    WorkspaceRename(String),
    WorkspaceDelete,
    WorkspaceList,
    WidgetAdd(WidgetType),
    WidgetRemove(String),
    Focus,
    Save,
    Help,
    Exit,
}

/// Parse one input line. Blank lines are `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let Some(cmdline) = trimmed.strip_prefix('/') else {
        return Err("expected slash command (first non-whitespace character must be '/')".to_string());
    };

    let (command, rest) = split_word(cmdline);
    let cmd = match command {
        "sidecar" => parse_sidecar(rest)?,
        "notifications" => no_args(rest, ConsoleCommand::Notifications)?,
        "clipboard" => {
            if rest.is_empty() {
                return Err("usage: /clipboard <text>".to_string());
            }
            ConsoleCommand::Clipboard(rest.to_string())
        }
        "workspace" => match split_word(rest) {
            ("new", "") => ConsoleCommand::WorkspaceNew,
            ("rename", name) if !name.is_empty() => ConsoleCommand::WorkspaceRename(name.to_string()),
            ("delete", "") => ConsoleCommand::WorkspaceDelete,
            ("list", "") => ConsoleCommand::WorkspaceList,
            _ => return Err("usage: /workspace new|rename <name>|delete|list".to_string()),
        },
        "widget" => match split_word(rest) {
            ("add", kind) if !kind.is_empty() => ConsoleCommand::WidgetAdd(kind.parse()?),
            ("remove", id) if !id.is_empty() => ConsoleCommand::WidgetRemove(id.to_string()),
            _ => return Err("usage: /widget add <type>|remove <id>".to_string()),
        },
        "focus" => no_args(rest, ConsoleCommand::Focus)?,
        "save" => no_args(rest, ConsoleCommand::Save)?,
        "help" => no_args(rest, ConsoleCommand::Help)?,
        "exit" | "quit" => no_args(rest, ConsoleCommand::Exit)?,
        "" => return Err("usage: /<command> [args]".to_string()),
        other => return Err(format!("unknown command: /{other}")),
    };
    Ok(Some(cmd))
}

fn parse_sidecar(rest: &str) -> Result<ConsoleCommand, String> {
    const USAGE: &str = "usage: /sidecar start|stop <name> | send <name> <type> [json] | status";
    let (action, rest) = split_word(rest);
    if action == "status" {
        return no_args(rest, ConsoleCommand::SidecarStatus);
    }
    let (name, rest) = split_word(rest);
    if name.is_empty() {
        return Err(USAGE.to_string());
    }
    let name: SidecarName = name.parse()?;
    match action {
        "start" => no_args(rest, ConsoleCommand::SidecarStart(name)),
        "stop" => no_args(rest, ConsoleCommand::SidecarStop(name)),
        "send" => {
            let (kind, payload) = split_word(rest);
            if kind.is_empty() {
                return Err(USAGE.to_string());
            }
            let kind: CommandKind = kind.parse()?;
            let command = if payload.is_empty() {
                SidecarCommand::new(kind)
            } else {
                let payload: Value =
                    serde_json::from_str(payload).map_err(|e| format!("invalid payload json: {e}"))?;
                SidecarCommand::with_payload(kind, payload)
            };
            Ok(ConsoleCommand::SidecarSend { name, command })
        }
        _ => Err(USAGE.to_string()),
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (s, ""),
    }
}

fn no_args(rest: &str, cmd: ConsoleCommand) -> Result<ConsoleCommand, String> {
    if rest.is_empty() { Ok(cmd) } else { Err("unexpected arguments".to_string()) }
}

pub const USAGE: &str = "\
commands:
  /sidecar start|stop <name>
  /sidecar send <name> <type> [json]
  /sidecar status
  /notifications
  /clipboard <text>
  /workspace new|rename <name>|delete|list
  /widget add <type>|remove <id>
  /focus
  /save
  /help
  /exit";

/// Result of running one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Output(Vec<String>),
    Exit,
}

impl Outcome {
    fn line(s: impl Into<String>) -> Self {
        Self::Output(vec![s.into()])
    }
}

/// Desktop state plus the widget-backed feeds, tied to a state file.
pub struct Session {
    pub state: DesktopState,
    pub feed: NotificationFeed,
    pub clipboard: ClipboardHistory,
    state_file: PathBuf,
}

impl Session {
    /// Load state from `state_file`, recovering the notification feed and
    /// clipboard history from the first widget of each kind.
    pub fn load(state_file: impl Into<PathBuf>) -> Result<Self, AppError> {
        let state_file = state_file.into();
        let state = DesktopState::load(&state_file)?;
        let feed = restore_widget_value(&state, WidgetType::Notifications, NOTIFICATIONS_KEY);
        let clipboard = restore_widget_value(&state, WidgetType::Clipboard, CLIPBOARD_KEY);
        Ok(Self { state, feed, clipboard, state_file })
    }

    pub fn save(&self) -> Result<(), AppError> {
        self.state.save(&self.state_file)
    }

    /// Fold a sidecar event into the session.
    pub fn handle_event(&mut self, event: &SidecarEvent) -> Option<String> {
        match event {
            SidecarEvent::Notification { notification, .. } => {
                if !self.feed.ingest(notification) {
                    debug!(id = %notification.id, "duplicate notification");
                    return None;
                }
                self.sync_widget(WidgetType::Notifications, NOTIFICATIONS_KEY, &self.feed.clone());
                Some(format!("[{}] {}: {}", notification.app_name, notification.title, notification.message))
            }
            SidecarEvent::SearchResults { results, .. } => Some(
                results
                    .iter()
                    .map(|r| format!("  {} ({})", r.path, r.name))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            SidecarEvent::Ready { sidecar } => Some(format!("{sidecar}: ready")),
            SidecarEvent::Stopped { sidecar } => Some(format!("{sidecar}: stopped")),
            SidecarEvent::Error { sidecar, error } => {
                warn!(%sidecar, "sidecar error: {error}");
                Some(format!("{sidecar}: error: {error}"))
            }
            SidecarEvent::Exit { sidecar, code } => Some(match code {
                Some(code) => format!("{sidecar}: exited with code {code}"),
                None => format!("{sidecar}: terminated"),
            }),
            SidecarEvent::Other { sidecar, kind, .. } => {
                debug!(%sidecar, kind, "unhandled sidecar message");
                None
            }
        }
    }

    /// Pump sidecar events and input lines until EOF, `/exit` or `shutdown`.
    /// With `prompt` set, `# ` is written once up front and again after each
    /// handled input line, never after an event.
    pub async fn run<R, W>(
        &mut self,
        sidecars: &SidecarManager,
        events: &mut broadcast::Receiver<SidecarEvent>,
        input: R,
        out: &mut W,
        prompt: bool,
        shutdown: &CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let mut events_open = true;
        write_prompt(out, prompt)?;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                event = events.recv(), if events_open => match event {
                    Ok(event) => {
                        if let Some(line) = self.handle_event(&event) {
                            writeln!(out, "{line}")?;
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("dropped {n} sidecar events"),
                    Err(RecvError::Closed) => events_open = false,
                },

                line = lines.next_line() => {
                    let input = match line {
                        Ok(Some(l)) => l,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("stdin read error: {e}");
                            break;
                        }
                    };
                    match parse_command(&input) {
                        Ok(None) => {}
                        Ok(Some(cmd)) => match self.execute(cmd, sidecars).await {
                            Outcome::Output(lines) => {
                                for l in lines {
                                    writeln!(out, "{l}")?;
                                }
                            }
                            Outcome::Exit => break,
                        },
                        Err(e) => writeln!(out, "{e}\n{USAGE}")?,
                    }
                    write_prompt(out, prompt)?;
                }
            }
        }
        out.flush()
    }

    pub async fn execute(&mut self, cmd: ConsoleCommand, sidecars: &SidecarManager) -> Outcome {
        match cmd {
            ConsoleCommand::SidecarStart(name) => match sidecars.start(name) {
                Ok(_) => {
                    if name == SidecarName::Notify {
                        sidecars.send(name, &SidecarCommand::new(CommandKind::Start)).await;
                    }
                    Outcome::line(format!("{name}: started"))
                }
                Err(e) => Outcome::line(format!("{e}")),
            },
            ConsoleCommand::SidecarStop(name) => {
                if !sidecars.is_running(name) {
                    return Outcome::line(format!("{name}: not running"));
                }
                sidecars.stop(name).await;
                Outcome::line(format!("{name}: stopping"))
            }
            ConsoleCommand::SidecarSend { name, command } => {
                if sidecars.send(name, &command).await {
                    Outcome::line("sent")
                } else {
                    Outcome::line(format!("{name}: not running"))
                }
            }
            ConsoleCommand::SidecarStatus => Outcome::Output(
                SidecarName::ALL
                    .into_iter()
                    .map(|n| {
                        let status = if sidecars.is_running(n) { "running" } else { "stopped" };
                        format!("{n}: {status}")
                    })
                    .collect(),
            ),
            ConsoleCommand::Notifications => self.list_notifications(),
            ConsoleCommand::Clipboard(text) => {
                if self.clipboard.record(ClipboardKind::Text, text) {
                    self.sync_widget(WidgetType::Clipboard, CLIPBOARD_KEY, &self.clipboard.clone());
                    Outcome::line(format!("clipboard: {} item(s)", self.clipboard.items().len()))
                } else {
                    Outcome::line("clipboard: already recorded")
                }
            }
            ConsoleCommand::WorkspaceNew => {
                let id = self.state.create_workspace();
                Outcome::line(format!("workspace {id} created"))
            }
            ConsoleCommand::WorkspaceRename(name) => {
                let id = self.state.active_workspace_id.clone();
                self.state.rename_workspace(&id, name);
                Outcome::line(format!("workspace {id} renamed"))
            }
            ConsoleCommand::WorkspaceDelete => {
                let id = self.state.active_workspace_id.clone();
                self.state.delete_workspace(&id);
                Outcome::line(format!("workspace {id} deleted; active is {}", self.state.active_workspace_id))
            }
            ConsoleCommand::WorkspaceList => Outcome::Output(
                self.state
                    .workspaces
                    .iter()
                    .map(|ws| {
                        let marker = if ws.id == self.state.active_workspace_id { "*" } else { " " };
                        let widgets: Vec<_> = ws.widgets.iter().map(|w| format!("{}:{}", w.kind, w.id)).collect();
                        format!("{marker} {} {} [{}]", ws.id, ws.name, widgets.join(", "))
                    })
                    .collect(),
            ),
            ConsoleCommand::WidgetAdd(kind) => {
                let ws = self.state.active_workspace_id.clone();
                let data = match kind {
                    WidgetType::Notifications => data_with(NOTIFICATIONS_KEY, &self.feed),
                    WidgetType::Clipboard => data_with(CLIPBOARD_KEY, &self.clipboard),
                    _ => Map::new(),
                };
                match self.state.add_widget(&ws, kind, data, None) {
                    Some(id) => Outcome::line(format!("{kind} widget {id} added")),
                    None => Outcome::line("no active workspace"),
                }
            }
            ConsoleCommand::WidgetRemove(id) => {
                let ws = self.state.active_workspace_id.clone();
                if self.state.remove_widget(&ws, &id) {
                    Outcome::line(format!("widget {id} removed"))
                } else {
                    Outcome::line(format!("no widget {id} in the active workspace"))
                }
            }
            ConsoleCommand::Focus => {
                self.state.toggle_focus_mode();
                let mode = match self.state.mode {
                    Mode::Flow => "flow",
                    Mode::Focus => "focus",
                };
                Outcome::line(format!("mode: {mode}"))
            }
            ConsoleCommand::Save => match self.save() {
                Ok(()) => Outcome::line(format!("saved to {}", self.state_file.display())),
                Err(e) => Outcome::line(format!("{e}")),
            },
            ConsoleCommand::Help => Outcome::Output(USAGE.lines().map(str::to_string).collect()),
            ConsoleCommand::Exit => Outcome::Exit,
        }
    }

    fn list_notifications(&self) -> Outcome {
        if self.feed.is_empty() {
            return Outcome::line("no notifications");
        }
        let mut out = vec![format!("{} unread", self.feed.unread_count())];
        for group in self.feed.grouped() {
            out.push(format!("{} ({} unread)", group.source.label(), group.unread_count));
            for n in group.notifications {
                let dot = if n.read { " " } else { "•" };
                out.push(format!("  {dot} {}: {}", n.title, n.message));
            }
        }
        Outcome::Output(out)
    }

    /// Mirror a feed into every widget of `kind` so it persists with the
    /// workspace.
    fn sync_widget<T: serde::Serialize>(&mut self, kind: WidgetType, key: &str, value: &T) {
        let targets: Vec<(String, String)> = self
            .state
            .workspaces
            .iter()
            .flat_map(|ws| {
                ws.widgets
                    .iter()
                    .filter(|w| w.kind == kind)
                    .map(|w| (ws.id.clone(), w.id.clone()))
            })
            .collect();
        for (ws, widget) in targets {
            self.state.update_widget_data(&ws, &widget, data_with(key, value));
        }
    }
}

fn data_with<T: serde::Serialize>(key: &str, value: &T) -> Map<String, Value> {
    let mut data = Map::new();
    match serde_json::to_value(value) {
        Ok(v) => {
            data.insert(key.to_string(), v);
        }
        Err(e) => warn!(key, "cannot encode widget data: {e}"),
    }
    data
}

fn restore_widget_value<T: serde::de::DeserializeOwned + Default>(
    state: &DesktopState,
    kind: WidgetType,
    key: &str,
) -> T {
    let stored = state
        .workspaces
        .iter()
        .flat_map(|ws| ws.widgets.iter())
        .find(|w| w.kind == kind)
        .and_then(|w| w.data.get(key).cloned());
    match stored.map(serde_json::from_value) {
        Some(Ok(value)) => {
            info!(widget = %kind, "restored widget data");
            value
        }
        Some(Err(e)) => {
            warn!(widget = %kind, "ignoring unreadable widget data: {e}");
            T::default()
        }
        None => T::default(),
    }
}

fn write_prompt(out: &mut impl Write, enabled: bool) -> std::io::Result<()> {
    if enabled {
        write!(out, "# ")?;
        out.flush()?;
    }
    Ok(())
}
