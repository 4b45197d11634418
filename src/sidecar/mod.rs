//! Sidecar process bridge.
//!
//! Each sidecar is a child process speaking line-delimited JSON over stdio.
//! [`SidecarManager`] owns the running children and republishes everything
//! they print as [`SidecarEvent`]s on a broadcast channel.

pub mod protocol;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::error::AppError;

pub use protocol::{
    CommandKind, LineFramer, NotificationAction, SearchResultKind, SidecarCommand, SidecarEvent,
    SidecarName, SidecarNotification, SidecarSearchResult,
};

/// Time a sidecar gets to exit on its own after `stop` before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 256;

/// Platform directory name used under the sidecar root.
pub fn platform_dir(os: &str) -> &str {
    match os {
        "windows" => "win32",
        "macos" => "darwin",
        other => other,
    }
}

/// Program and arguments used to launch `name` on `os`.
pub fn launch_command(base_dir: &Path, name: SidecarName, os: &str) -> (PathBuf, Vec<String>) {
    let dir = base_dir.join(platform_dir(os));
    if os == "windows" && name.uses_powershell() {
        let script = dir.join(format!("{name}.ps1"));
        let args = vec![
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-NoProfile".to_string(),
            "-File".to_string(),
            script.to_string_lossy().into_owned(),
        ];
        return (PathBuf::from("powershell.exe"), args);
    }
    let exe = if os == "windows" { format!("{name}.exe") } else { name.to_string() };
    (dir.join(exe), Vec::new())
}

struct Running {
    generation: u64,
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    kill: Option<oneshot::Sender<()>>,
}

type Processes = Arc<Mutex<HashMap<SidecarName, Running>>>;

pub struct SidecarManager {
    base_dir: PathBuf,
    os: &'static str,
    processes: Processes,
    events: broadcast::Sender<SidecarEvent>,
    generation: AtomicU64,
}

impl SidecarManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            base_dir: base_dir.into(),
            os: std::env::consts::OS,
            processes: Arc::new(Mutex::new(HashMap::new())),
            events,
            generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SidecarEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self, name: SidecarName) -> bool {
        lock(&self.processes).contains_key(&name)
    }

    pub fn running(&self) -> Vec<SidecarName> {
        let procs = lock(&self.processes);
        SidecarName::ALL.into_iter().filter(|n| procs.contains_key(n)).collect()
    }

    /// Spawn `name` unless it is already running.
    ///
    /// Spawn failures are reported both as an `Err` and as an
    /// [`SidecarEvent::Error`] so subscribers see them.
    pub fn start(&self, name: SidecarName) -> Result<bool, AppError> {
        if self.is_running(name) {
            debug!(sidecar = %name, "already running");
            return Ok(true);
        }

        let (program, args) = launch_command(&self.base_dir, name, self.os);
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let msg = format!("failed to spawn {name} ({}): {e}", program.display());
                warn!("{msg}");
                let _ = self.events.send(SidecarEvent::Error { sidecar: name, error: msg.clone() });
                AppError::Sidecar(msg)
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(AppError::Sidecar(format!("{name}: stdio not captured")));
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel();
        lock(&self.processes).insert(
            name,
            Running {
                generation,
                stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
                kill: Some(kill_tx),
            },
        );
        info!(sidecar = %name, pid = ?child.id(), "sidecar started");

        let events = self.events.clone();
        let reader = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut framer = LineFramer::default();
            let mut chunk = [0u8; 4096];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in framer.push(&chunk[..n]) {
                            publish_line(&events, name, &line);
                        }
                    }
                    Err(e) => {
                        warn!(sidecar = %name, "stdout read failed: {e}");
                        break;
                    }
                }
            }
            if let Some(rest) = framer.finish() {
                publish_line(&events, name, &rest);
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(sidecar = %name, "stderr: {line}");
            }
        });

        let events = self.events.clone();
        let processes = self.processes.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = kill_rx => {
                    debug!(sidecar = %name, "killing sidecar");
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            // Deliver trailing output before the exit event.
            let _ = reader.await;
            let code = match status {
                Ok(s) => s.code(),
                Err(e) => {
                    warn!(sidecar = %name, "wait failed: {e}");
                    None
                }
            };
            {
                let mut procs = lock(&processes);
                if procs.get(&name).is_some_and(|r| r.generation == generation) {
                    procs.remove(&name);
                }
            }
            info!(sidecar = %name, ?code, "sidecar exited");
            let _ = events.send(SidecarEvent::Exit { sidecar: name, code });
        });

        Ok(true)
    }

    /// Write one command line. `false` when the sidecar is not running or
    /// the write fails.
    pub async fn send(&self, name: SidecarName, command: &SidecarCommand) -> bool {
        let Some(stdin) = lock(&self.processes).get(&name).map(|r| r.stdin.clone()) else {
            return false;
        };
        let mut line = match serde_json::to_string(command) {
            Ok(line) => line,
            Err(e) => {
                warn!(sidecar = %name, "failed to encode command: {e}");
                return false;
            }
        };
        line.push('\n');

        let mut stdin = stdin.lock().await;
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => true,
            Err(e) => {
                warn!(sidecar = %name, "write failed: {e}");
                false
            }
        }
    }

    /// Ask `name` to stop, killing it if it is still around after
    /// [`STOP_GRACE`].
    pub async fn stop(&self, name: SidecarName) {
        let Some(generation) = lock(&self.processes).get(&name).map(|r| r.generation) else {
            return;
        };
        self.send(name, &SidecarCommand::new(CommandKind::Stop)).await;

        let processes = self.processes.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            let kill = lock(&processes)
                .get_mut(&name)
                .filter(|r| r.generation == generation)
                .and_then(|r| r.kill.take());
            if let Some(kill) = kill {
                warn!(sidecar = %name, "did not stop in time, killing");
                let _ = kill.send(());
            }
        });
    }

    pub async fn stop_all(&self) {
        for name in self.running() {
            self.stop(name).await;
        }
    }
}

fn publish_line(events: &broadcast::Sender<SidecarEvent>, name: SidecarName, line: &str) {
    match protocol::decode_line(name, line) {
        Ok(event) => {
            let _ = events.send(event);
        }
        Err(e) => warn!(sidecar = %name, "dropping invalid line: {e}"),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_launch_path() {
        let (prog, args) = launch_command(Path::new("/opt/sable"), SidecarName::Search, "linux");
        assert_eq!(prog, PathBuf::from("/opt/sable/linux/sable-search"));
        assert!(args.is_empty());

        let (prog, _) = launch_command(Path::new("/opt/sable"), SidecarName::Notify, "macos");
        assert_eq!(prog, PathBuf::from("/opt/sable/darwin/sable-notify"));
    }

    #[test]
    fn windows_launch_commands() {
        let base = Path::new("sidecars");
        let (prog, args) = launch_command(base, SidecarName::Notify, "windows");
        assert_eq!(prog, PathBuf::from("powershell.exe"));
        assert_eq!(&args[..4], &["-ExecutionPolicy", "Bypass", "-NoProfile", "-File"]);
        assert!(args[4].ends_with("sable-notify.ps1"));
        assert!(args[4].contains("win32"));

        let (prog, args) = launch_command(base, SidecarName::Automation, "windows");
        assert_eq!(prog, base.join("win32").join("sable-automation.exe"));
        assert!(args.is_empty());
    }

    #[tokio::test]
    async fn send_to_stopped_sidecar_is_false() {
        let mgr = SidecarManager::new("/nonexistent");
        assert!(!mgr.is_running(SidecarName::Notify));
        assert!(!mgr.send(SidecarName::Notify, &SidecarCommand::new(CommandKind::Start)).await);
        mgr.stop(SidecarName::Notify).await;
    }

    #[tokio::test]
    async fn spawn_failure_emits_error() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SidecarManager::new(dir.path());
        let mut rx = mgr.subscribe();
        assert!(mgr.start(SidecarName::Automation).is_err());
        match rx.recv().await.unwrap() {
            SidecarEvent::Error { sidecar, error } => {
                assert_eq!(sidecar, SidecarName::Automation);
                assert!(error.contains("failed to spawn"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!mgr.is_running(SidecarName::Automation));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        const ECHO_SIDECAR: &str = r#"#!/bin/sh
echo 'garbage that is not json'
echo '{"type":"ready","payload":null}'
while read line; do
  case "$line" in
    *'"stop"'*) echo '{"type":"stopped","payload":null}'; exit 0 ;;
    *) printf '{"type":"echo","payload":%s}\n' "$line" ;;
  esac
done
"#;

        const STUBBORN_SIDECAR: &str = r#"#!/bin/sh
echo '{"type":"ready","payload":null}'
trap '' TERM
while true; do sleep 1; done
"#;

        fn install(dir: &Path, name: SidecarName, script: &str) {
            let platform = dir.join(platform_dir(std::env::consts::OS));
            std::fs::create_dir_all(&platform).unwrap();
            let path = platform.join(name.as_str());
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        async fn next(rx: &mut broadcast::Receiver<SidecarEvent>) -> SidecarEvent {
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for sidecar event")
                .expect("event channel closed")
        }

        #[tokio::test]
        async fn start_send_stop_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            install(dir.path(), SidecarName::Search, ECHO_SIDECAR);
            let mgr = SidecarManager::new(dir.path());
            let mut rx = mgr.subscribe();

            assert!(mgr.start(SidecarName::Search).unwrap());
            assert!(mgr.start(SidecarName::Search).unwrap(), "second start is a no-op");
            assert!(mgr.is_running(SidecarName::Search));
            assert_eq!(next(&mut rx).await, SidecarEvent::Ready { sidecar: SidecarName::Search });

            let cmd = SidecarCommand::with_payload(CommandKind::Search, json!({ "query": "notes" }));
            assert!(mgr.send(SidecarName::Search, &cmd).await);
            match next(&mut rx).await {
                SidecarEvent::Other { kind, payload, .. } => {
                    assert_eq!(kind, "echo");
                    assert_eq!(payload["payload"]["query"], "notes");
                }
                other => panic!("unexpected event: {other:?}"),
            }

            mgr.stop(SidecarName::Search).await;
            assert_eq!(next(&mut rx).await, SidecarEvent::Stopped { sidecar: SidecarName::Search });
            assert_eq!(
                next(&mut rx).await,
                SidecarEvent::Exit { sidecar: SidecarName::Search, code: Some(0) }
            );
            assert!(!mgr.is_running(SidecarName::Search));
        }

        #[tokio::test]
        async fn stop_kills_after_grace() {
            let dir = tempfile::tempdir().unwrap();
            install(dir.path(), SidecarName::Automation, STUBBORN_SIDECAR);
            let mgr = SidecarManager::new(dir.path());
            let mut rx = mgr.subscribe();

            mgr.start(SidecarName::Automation).unwrap();
            assert_eq!(next(&mut rx).await, SidecarEvent::Ready { sidecar: SidecarName::Automation });

            mgr.stop_all().await;
            match next(&mut rx).await {
                SidecarEvent::Exit { sidecar, code } => {
                    assert_eq!(sidecar, SidecarName::Automation);
                    assert_eq!(code, None, "killed by signal");
                }
                other => panic!("unexpected event: {other:?}"),
            }
            assert!(!mgr.is_running(SidecarName::Automation));
        }
    }
}
