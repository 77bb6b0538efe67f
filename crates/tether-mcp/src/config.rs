//! Server table and session deadlines.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the `initialize` exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Two timeouts closer together than this mark a server as wedged.
pub const DEFAULT_WEDGE_WINDOW: Duration = Duration::from_secs(60);

/// The server list, keyed by server name.
///
/// Accepts both the `servers` table used in TOML files and the `mcpServers`
/// object used by JSON client configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default, alias = "mcpServers")]
    pub servers: BTreeMap<String, McpServerConfig>,
}

/// One entry of the server table as written in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Merged over the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-call timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Everything needed to launch one server. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
            timeout_ms: None,
        }
    }

    /// The command line as the operator would type it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl McpConfig {
    /// Server specs in name order.
    pub fn specs(&self) -> Vec<ServerSpec> {
        self.servers
            .iter()
            .map(|(name, server)| ServerSpec {
                name: name.clone(),
                command: server.command.clone(),
                args: server.args.clone(),
                env: server.env.clone(),
                timeout_ms: server.timeout_ms,
            })
            .collect()
    }
}

/// Deadlines applied by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub call_timeout: Duration,
    pub handshake_timeout: Duration,
    pub wedge_window: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            wedge_window: DEFAULT_WEDGE_WINDOW,
        }
    }
}

impl SessionOptions {
    /// Apply a server's own timeout override, if it has one.
    pub fn for_server(self, spec: &ServerSpec) -> Self {
        match spec.timeout_ms {
            Some(ms) => Self {
                call_timeout: Duration::from_millis(ms),
                ..self
            },
            None => self,
        }
    }
}
