//! Child process supervision for stdio MCP servers.
//!
//! Spawning yields the piped stdio streams plus a [`ProcessHandle`]
//! for killing the process and observing its lifecycle. A monitor task
//! owns the [`Child`] and reaps it, broadcasting a single
//! [`ProcessEvent`] when it goes away.

use std::io::ErrorKind;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, mpsc};

use tether_domain::config::ServerConfig;

use crate::transport::TransportError;

/// Lifecycle event reported by the monitor task.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// The process exited, voluntarily or not.
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The monitor could not determine the process's fate.
    Fault { message: String },
}

impl ProcessEvent {
    /// Human-readable description for status reporting and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Exited {
                code: Some(code), ..
            } => format!("process exited with status {code}"),
            Self::Exited {
                signal: Some(signal),
                ..
            } => format!("process killed by signal {signal}"),
            Self::Exited { .. } => "process exited".into(),
            Self::Fault { message } => message.clone(),
        }
    }
}

/// Control handle for a spawned server process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub(crate) kill_tx: mpsc::Sender<()>,
    pub(crate) events: broadcast::Sender<ProcessEvent>,
}

impl ProcessHandle {
    /// Ask the monitor to kill the process. Returns immediately; the
    /// exit is reported through [`ProcessHandle::subscribe`].
    pub fn kill(&self) {
        let _ = self.kill_tx.try_send(());
    }

    /// Subscribe to lifecycle events for this process.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }
}

/// A freshly spawned server with its stdio pipes taken.
#[derive(Debug)]
pub struct SpawnedServer {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
    pub handle: ProcessHandle,
}

/// Spawn an MCP server process per its config.
///
/// The child gets piped stdin/stdout/stderr, the configured env merged
/// over the inherited environment, and the configured working
/// directory. Spawn failures (missing binary, bad cwd) surface as
/// [`TransportError::Spawn`].
pub fn spawn_server(server_id: &str, config: &ServerConfig) -> Result<SpawnedServer, TransportError> {
    let mut cmd = base_command(config);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
        command: config.command.clone(),
        source,
    })?;

    tracing::debug!(
        server_id = %server_id,
        command = %config.command,
        pid = ?child.id(),
        "spawned MCP server process"
    );

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::Io(pipe_error("stdin")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::Io(pipe_error("stdout")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TransportError::Io(pipe_error("stderr")))?;

    let (kill_tx, kill_rx) = mpsc::channel(1);
    let (events_tx, _) = broadcast::channel(8);
    spawn_monitor(server_id.to_owned(), child, kill_rx, events_tx.clone());

    Ok(SpawnedServer {
        stdin,
        stdout,
        stderr,
        handle: ProcessHandle {
            kill_tx,
            events: events_tx,
        },
    })
}

#[cfg(not(windows))]
fn base_command(config: &ServerConfig) -> Command {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    cmd
}

/// Windows resolves launcher scripts (`npx`, `uvx`, `.cmd` shims)
/// through the shell, so route the command via `cmd /C`.
#[cfg(windows)]
fn base_command(config: &ServerConfig) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(&config.command);
    cmd.args(&config.args);
    cmd
}

fn pipe_error(stream: &str) -> std::io::Error {
    std::io::Error::new(ErrorKind::BrokenPipe, format!("failed to open child {stream}"))
}

/// Own the child until it exits, then report how it went.
///
/// The select is between a natural exit and a kill request; either way
/// the child is reaped here and exactly one event is broadcast.
fn spawn_monitor(
    server_id: String,
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    events: broadcast::Sender<ProcessEvent>,
) {
    tokio::spawn(async move {
        let event = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => {
                    tracing::debug!(
                        server_id = %server_id,
                        code = ?status.code(),
                        "MCP server process exited"
                    );
                    exit_event(&status)
                }
                Err(e) => {
                    tracing::warn!(server_id = %server_id, error = %e, "failed to wait on MCP server process");
                    ProcessEvent::Fault {
                        message: format!("wait failed: {e}"),
                    }
                }
            },
            Some(()) = kill_rx.recv() => {
                tracing::debug!(server_id = %server_id, "killing MCP server process");
                if let Err(e) = child.kill().await {
                    tracing::debug!(server_id = %server_id, error = %e, "kill failed");
                }
                match child.wait().await {
                    Ok(status) => exit_event(&status),
                    Err(e) => ProcessEvent::Fault {
                        message: format!("wait failed: {e}"),
                    },
                }
            }
        };
        let _ = events.send(event);
    });
}

fn exit_event(status: &std::process::ExitStatus) -> ProcessEvent {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ProcessEvent::Exited {
        code: status.code(),
        signal,
    }
}
