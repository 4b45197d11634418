//! Sidecar wire protocol: one JSON object per line in both directions.
//!
//! ```text
//! → {"type":"start"|"stop"|"search"|"action"|"dismiss","payload":{...}?}
//! ← {"type":"notification"|"search-results"|"error"|"ready"|"stopped"|<other>,"payload":...}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Known sidecar executables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SidecarName {
    Notify,
    Search,
    Automation,
}

impl SidecarName {
    pub const ALL: [SidecarName; 3] = [Self::Notify, Self::Search, Self::Automation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notify => "sable-notify",
            Self::Search => "sable-search",
            Self::Automation => "sable-automation",
        }
    }

    /// Ships as a PowerShell script on Windows instead of a native binary.
    pub fn uses_powershell(&self) -> bool {
        matches!(self, Self::Notify)
    }
}

impl fmt::Display for SidecarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SidecarName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| format!("unknown sidecar: '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
    Search,
    Action,
    Dismiss,
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string())).map_err(|_| format!("unknown command: '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarCommand {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SidecarCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self { kind, payload: None }
    }

    pub fn with_payload(kind: CommandKind, payload: Value) -> Self {
        Self { kind, payload: Some(payload) }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SidecarResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
}

/// An OS notification captured by `sable-notify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarNotification {
    pub id: String,
    pub app_id: String,
    pub app_name: String,
    pub title: String,
    pub message: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Base64-encoded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<NotificationAction>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchResultKind {
    File,
    Folder,
    App,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarSearchResult {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SearchResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
}

/// Everything the manager reports, tagged with the originating sidecar.
#[derive(Debug, Clone, PartialEq)]
pub enum SidecarEvent {
    Notification { sidecar: SidecarName, notification: SidecarNotification },
    SearchResults { sidecar: SidecarName, results: Vec<SidecarSearchResult> },
    Ready { sidecar: SidecarName },
    Error { sidecar: SidecarName, error: String },
    Stopped { sidecar: SidecarName },
    Exit { sidecar: SidecarName, code: Option<i32> },
    Other { sidecar: SidecarName, kind: String, payload: Value },
}

impl SidecarEvent {
    pub fn sidecar(&self) -> SidecarName {
        match self {
            Self::Notification { sidecar, .. }
            | Self::SearchResults { sidecar, .. }
            | Self::Ready { sidecar }
            | Self::Error { sidecar, .. }
            | Self::Stopped { sidecar }
            | Self::Exit { sidecar, .. }
            | Self::Other { sidecar, .. } => *sidecar,
        }
    }
}

/// Decode one stdout line into an event.
pub fn decode_line(sidecar: SidecarName, line: &str) -> Result<SidecarEvent, serde_json::Error> {
    let resp: SidecarResponse = serde_json::from_str(line)?;
    Ok(match resp.kind.as_str() {
        "notification" => SidecarEvent::Notification {
            sidecar,
            notification: serde_json::from_value(resp.payload)?,
        },
        "search-results" => SidecarEvent::SearchResults {
            sidecar,
            results: serde_json::from_value(resp.payload)?,
        },
        "ready" => SidecarEvent::Ready { sidecar },
        "stopped" => SidecarEvent::Stopped { sidecar },
        "error" => SidecarEvent::Error {
            sidecar,
            error: match resp.payload {
                Value::String(s) => s,
                other => other.to_string(),
            },
        },
        _ => SidecarEvent::Other { sidecar, kind: resp.kind, payload: resp.payload },
    })
}

/// Longest line a sidecar may write. Anything longer is dropped up to its
/// terminating `\n`.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into complete lines. Partial lines wait for their
/// `\n`; blank lines are skipped.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no `\n`.
    scanned: usize,
    /// Inside an over-long line; bytes are dropped until the next `\n`.
    discarding: bool,
}

impl LineFramer {
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<String> {
        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return Vec::new(),
            }
        }

        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let pos = self.scanned + offset;
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            self.scanned = 0;
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_LINE_BYTES {
            warn!(bytes = self.buf.len(), max = MAX_LINE_BYTES, "sidecar line too long; dropping it");
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        self.discarding = false;
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buf)).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}
