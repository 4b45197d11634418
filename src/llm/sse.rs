//! Upstream SSE parsing for OpenAI-style streaming completions.
//!
//! Events are split on a blank line (`\n\n` or `\r\n\r\n`), the `data:` lines
//! of each event are joined, and `data: [DONE]` ends the stream. Each JSON
//! chunk's `choices[0].delta.content` becomes a [`StreamEvent::Delta`].

use std::{fmt::Display, time::Duration};

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::StreamEvent;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;
/// Consecutive unparseable payloads tolerated before giving up.
const MAX_SSE_PARSE_ERRORS: usize = 3;

pub(crate) fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

pub(crate) fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Join the `data:` lines of one event with `\n`. `None` when the event has
/// no data lines (comments, `event:`-only frames).
pub(crate) fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    found.then_some(data)
}

#[derive(Debug, Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Relay an SSE byte stream to `tx`.
///
/// Always finishes with exactly one `Done` or `Error` unless the receiver has
/// gone away, in which case reading stops at once.
pub(crate) async fn process_sse_stream<S, B, E>(
    stream: S,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();
    let mut parse_errors = 0usize;
    let mut deltas = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            warn!(timeout_secs = idle_timeout.as_secs(), "upstream stream idle timeout");
            let _ = send_event(tx, StreamEvent::Error("Stream idle timeout".into())).await;
            return;
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "upstream stream transport error");
                let _ = send_event(tx, StreamEvent::Error(format!("Stream transport error: {e}"))).await;
                return;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            let _ = send_event(
                tx,
                StreamEvent::Error("SSE buffer exceeded maximum size (4 MiB)".into()),
            )
            .await;
            return;
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                let _ = send_event(
                    tx,
                    StreamEvent::Error("Received invalid UTF-8 from SSE stream".into()),
                )
                .await;
                return;
            };

            let Some(data) = extract_sse_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                debug!(deltas, "upstream stream completed");
                let _ = send_event(tx, StreamEvent::Done).await;
                return;
            }

            let envelope = match serde_json::from_str::<ChunkEnvelope>(&data) {
                Ok(env) => {
                    parse_errors = 0;
                    env
                }
                Err(e) => {
                    parse_errors += 1;
                    warn!(error = %e, payload_bytes = data.len(), "invalid SSE JSON payload");
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        let _ = send_event(
                            tx,
                            StreamEvent::Error(format!("Invalid stream payload: {e}")),
                        )
                        .await;
                        return;
                    }
                    continue;
                }
            };

            if let Some(err) = envelope.error {
                let _ = send_event(tx, StreamEvent::Error(format!("Provider error: {}", err.message))).await;
                return;
            }

            let content = envelope
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
                .filter(|s| !s.is_empty());
            if let Some(text) = content {
                deltas += 1;
                if !send_event(tx, StreamEvent::Delta(text)).await {
                    debug!("stream receiver dropped; stopping upstream read");
                    return;
                }
            }
        }
    }

    let _ = send_event(
        tx,
        StreamEvent::Error("Connection closed before stream completed".into()),
    )
    .await;
}
