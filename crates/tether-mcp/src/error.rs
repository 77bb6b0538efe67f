//! Error types for MCP operations.

use tether_types::{ErrorKind, Failure};
use thiserror::Error;

/// Errors from MCP server communication.
///
/// Cloneable so that a single connect outcome can be handed to every caller
/// that waited on it.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    #[error("Failed to launch MCP server '{server}': {message}")]
    Launch { server: String, message: String },

    #[error("Transport error on '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("Failed to connect to MCP server '{server}': {reason}")]
    Connect { server: String, reason: String },

    #[error("Server '{name}' not found in configuration")]
    UnknownServer { name: String },

    #[error("Tool '{tool}' not found on server '{server}'")]
    UnknownTool { server: String, tool: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("MCP server '{server}' timed out after {timeout_ms}ms waiting for '{method}'")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("MCP server '{server}' is not connected")]
    NotConnected { server: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("Tool '{tool}' on '{server}' reported an error: {message}")]
    ToolFailed {
        server: String,
        tool: String,
        message: String,
    },

    #[error("MCP protocol error from '{server}': {message}")]
    Protocol { server: String, message: String },
}

impl McpError {
    /// Classify this error in the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::Launch { .. } => ErrorKind::Launch,
            McpError::Transport { .. } => ErrorKind::Transport,
            McpError::Connect { .. } => ErrorKind::Connect,
            McpError::UnknownServer { .. } => ErrorKind::UnknownServer,
            McpError::UnknownTool { .. } => ErrorKind::UnknownTool,
            McpError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            McpError::Timeout { .. } => ErrorKind::Timeout,
            McpError::NotConnected { .. } => ErrorKind::NotConnected,
            McpError::JsonRpc { .. } | McpError::ToolFailed { .. } | McpError::Protocol { .. } => {
                ErrorKind::ServerError
            }
        }
    }

    pub(crate) fn transport(server: &str, message: impl ToString) -> Self {
        McpError::Transport {
            server: server.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn protocol(server: &str, message: impl Into<String>) -> Self {
        McpError::Protocol {
            server: server.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn not_connected(server: &str) -> Self {
        McpError::NotConnected {
            server: server.to_string(),
        }
    }
}

impl From<McpError> for Failure {
    fn from(err: McpError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}
