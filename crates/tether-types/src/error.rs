//! Error vocabulary shared by the core and the front end.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The stable classification of every failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server process could not be started.
    Launch,
    /// I/O failure or abrupt process exit.
    Transport,
    /// Handshake failure, timeout, or malformed handshake response.
    Connect,
    /// No server with that name is configured.
    UnknownServer,
    /// The server's catalog has no tool with that name.
    UnknownTool,
    /// Arguments failed the local schema pre-check.
    InvalidArguments,
    /// The per-call deadline elapsed.
    Timeout,
    /// The session is not in a state that accepts the operation.
    NotConnected,
    /// The remote tool reported a failure.
    ServerError,
}

impl ErrorKind {
    /// Short machine-readable code, e.g. `unknown_tool`.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Launch => "launch",
            ErrorKind::Transport => "transport",
            ErrorKind::Connect => "connect",
            ErrorKind::UnknownServer => "unknown_server",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::ServerError => "server_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A presentation-agnostic failure: what went wrong and a human message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result type returned by every façade operation.
pub type Outcome<T> = Result<T, Failure>;
