//! Message transport to a server process.
//!
//! [`Transport`] is the seam between a session and the bytes on the wire:
//! one JSON message per call, in either direction. [`StdioTransport`] is the
//! production implementation, spawning a child process and speaking
//! newline-delimited JSON over its stdin/stdout.

use crate::config::ServerSpec;
use crate::error::McpError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Boxed future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long a freshly spawned process must stay alive to count as started.
pub const DEFAULT_STARTUP_WINDOW: Duration = Duration::from_millis(50);

/// How long `close` waits for the child to exit after closing its stdin.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A bidirectional, message-oriented channel to one server.
pub trait Transport: Send + Sync {
    /// Write one framed message.
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), McpError>>;

    /// Wait for the next complete message. `Ok(None)` means end of stream.
    fn receive(&self) -> BoxFuture<'_, Result<Option<Value>, McpError>>;

    /// Release the underlying process and pipes. Safe to call repeatedly.
    fn close(&self) -> BoxFuture<'_, Result<(), McpError>>;
}

/// Starts transports for server specs.
pub trait Launcher: Send + Sync {
    fn launch<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, McpError>>;
}

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    server: String,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Lines<BufReader<ChildStdout>>>,
    child: Mutex<Child>,
    shutdown_grace: Duration,
}

impl StdioTransport {
    /// Spawn the server process. Its stderr is forwarded to the log.
    pub fn spawn(spec: &ServerSpec) -> Result<Self, McpError> {
        let launch_error = |message: String| McpError::Launch {
            server: spec.name.clone(),
            message,
        };

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| launch_error(format!("{}: {e}", spec.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_error("stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error("stdout was not piped".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "stderr: {line}");
                }
            });
        }

        tracing::debug!(server = %spec.name, "spawned `{}`", spec.command_line());

        Ok(Self {
            server: spec.name.clone(),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout).lines()),
            child: Mutex::new(child),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Override how long `close` waits before killing the process.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// The exit status, if the process has already exited.
    pub async fn try_exit_status(&self) -> Result<Option<std::process::ExitStatus>, McpError> {
        self.child
            .lock()
            .await
            .try_wait()
            .map_err(|e| McpError::transport(&self.server, e))
    }
}

impl Transport for StdioTransport {
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            // serde_json escapes newlines inside strings, so one value is one line
            let mut line =
                serde_json::to_string(&message).map_err(|e| McpError::transport(&self.server, e))?;
            line.push('\n');

            let mut stdin = self.stdin.lock().await;
            let stdin = stdin
                .as_mut()
                .ok_or_else(|| McpError::transport(&self.server, "stdin already closed"))?;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| McpError::transport(&self.server, e))?;
            stdin
                .flush()
                .await
                .map_err(|e| McpError::transport(&self.server, e))
        })
    }

    fn receive(&self) -> BoxFuture<'_, Result<Option<Value>, McpError>> {
        Box::pin(async move {
            let mut lines = self.stdout.lock().await;
            loop {
                let line = lines
                    .next_line()
                    .await
                    .map_err(|e| McpError::transport(&self.server, e))?;
                let Some(line) = line else {
                    return Ok(None);
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str(trimmed) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => {
                        tracing::warn!(server = %self.server, "Skipping non-JSON line: {e}: {trimmed}");
                    }
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            // Dropping stdin sends EOF to the child
            drop(self.stdin.lock().await.take());

            let mut child = self.child.lock().await;
            let graceful = tokio::time::timeout(self.shutdown_grace, child.wait()).await;
            if graceful.is_err() {
                tracing::debug!(server = %self.server, "did not exit within grace period, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| McpError::transport(&self.server, e))?;
            }
            Ok(())
        })
    }
}

/// Launches servers as local child processes.
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    startup_window: Duration,
    shutdown_grace: Duration,
}

impl Default for StdioLauncher {
    fn default() -> Self {
        Self {
            startup_window: DEFAULT_STARTUP_WINDOW,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl StdioLauncher {
    pub fn new(startup_window: Duration, shutdown_grace: Duration) -> Self {
        Self {
            startup_window,
            shutdown_grace,
        }
    }
}

impl Launcher for StdioLauncher {
    fn launch<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, McpError>> {
        Box::pin(async move {
            let transport = StdioTransport::spawn(spec)?.with_shutdown_grace(self.shutdown_grace);

            tokio::time::sleep(self.startup_window).await;
            if let Some(status) = transport.try_exit_status().await? {
                return Err(McpError::Launch {
                    server: spec.name.clone(),
                    message: format!("process exited during startup ({status})"),
                });
            }

            Ok(Arc::new(transport) as Arc<dyn Transport>)
        })
    }
}
