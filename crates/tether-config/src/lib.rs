//! Configuration for Tether.
//!
//! The server list comes from the first config file found, in precedence
//! order:
//! 1. `--config <path>`
//! 2. `TETHER_CONFIG`
//! 3. `./tether.toml`
//! 4. `./config.json`
//! 5. `~/.tether/config.toml`
//!
//! Timeouts resolve CLI flags > env vars > config file > defaults.

mod error;

pub use error::ConfigError;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_mcp::config::McpServerConfig;
use tether_mcp::{McpConfig, SessionOptions};

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

/// Env var overriding the global config directory.
pub const CONFIG_DIR_ENV: &str = "TETHER_CONFIG_DIR";

/// Env var overriding the per-call timeout.
pub const CALL_TIMEOUT_ENV: &str = "TETHER_CALL_TIMEOUT_MS";

/// Project config file, looked up in the working directory.
pub const PROJECT_FILE: &str = "tether.toml";

/// JSON client config, looked up in the working directory.
pub const JSON_FILE: &str = "config.json";

/// Contents of a config file, TOML or JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default, alias = "mcpServers")]
    pub servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub client: ClientSettings,
}

/// Optional `[client]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSettings {
    pub call_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub wedge_window_ms: Option<u64>,
    pub confirm_calls: Option<bool>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub call_timeout_ms: Option<u64>,
    pub confirm_calls: Option<bool>,
}

/// Process state the lookup depends on.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub config_env: Option<String>,
    pub call_timeout_env: Option<String>,
    pub working_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl SearchContext {
    pub fn from_env() -> Self {
        Self {
            config_env: std::env::var(CONFIG_ENV).ok().filter(|v| !v.is_empty()),
            call_timeout_env: std::env::var(CALL_TIMEOUT_ENV).ok().filter(|v| !v.is_empty()),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_dir: config_dir(),
        }
    }
}

/// Resolved configuration for a Tether run.
#[derive(Debug, Clone)]
pub struct TetherConfig {
    pub mcp: McpConfig,
    pub session: SessionOptions,
    pub confirm_calls: bool,
    /// The file the servers came from; `None` when no file was found.
    pub source: Option<PathBuf>,
    /// Every location considered, in precedence order.
    pub searched: Vec<PathBuf>,
}

impl TetherConfig {
    /// Load configuration from the process environment.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, &SearchContext::from_env())
    }

    /// Load configuration against an explicit search context.
    ///
    /// An explicitly named file must exist. Without one, the first existing
    /// default location wins; finding none yields an empty server set.
    pub fn resolve(overrides: CliOverrides, ctx: &SearchContext) -> Result<Self, ConfigError> {
        let explicit = overrides
            .config_path
            .clone()
            .or_else(|| ctx.config_env.as_ref().map(PathBuf::from));

        let (source, searched) = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound {
                        path: path.display().to_string(),
                    });
                }
                (Some(path.clone()), vec![path])
            }
            None => {
                let candidates = vec![
                    ctx.working_dir.join(PROJECT_FILE),
                    ctx.working_dir.join(JSON_FILE),
                    ctx.config_dir.join("config.toml"),
                ];
                let found = candidates.iter().find(|p| p.is_file()).cloned();
                (found, candidates)
            }
        };

        let settings = match &source {
            Some(path) => {
                let settings = load_settings_file(path)?;
                tracing::debug!(
                    "Loaded {} server(s) from {}",
                    settings.servers.len(),
                    path.display()
                );
                settings
            }
            None => SettingsFile::default(),
        };
        validate_servers(&settings.servers)?;

        let env_timeout = ctx
            .call_timeout_env
            .as_deref()
            .map(|value| parse_millis(CALL_TIMEOUT_ENV, value))
            .transpose()?;
        let call_timeout_ms = overrides
            .call_timeout_ms
            .or(env_timeout)
            .or(settings.client.call_timeout_ms);

        let defaults = SessionOptions::default();
        let session = SessionOptions {
            call_timeout: duration("call_timeout_ms", call_timeout_ms, defaults.call_timeout)?,
            handshake_timeout: duration(
                "handshake_timeout_ms",
                settings.client.handshake_timeout_ms,
                defaults.handshake_timeout,
            )?,
            wedge_window: duration(
                "wedge_window_ms",
                settings.client.wedge_window_ms,
                defaults.wedge_window,
            )?,
        };

        let confirm_calls = overrides
            .confirm_calls
            .or(settings.client.confirm_calls)
            .unwrap_or(true);

        Ok(TetherConfig {
            mcp: McpConfig {
                servers: settings.servers,
            },
            session,
            confirm_calls,
            source,
            searched,
        })
    }
}

/// Get the Tether config directory path (~/.tether/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tether")
}

/// Read and parse a config file. `.json` is JSON, `.toml` is TOML, anything
/// else is sniffed from its first character.
pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let parse_error = |message: String| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    };

    let is_json = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => true,
        Some("toml") => false,
        _ => content.trim_start().starts_with('{'),
    };
    if is_json {
        serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))
    } else {
        toml::from_str(&content).map_err(|e| parse_error(e.to_string()))
    }
}

fn validate_servers(servers: &BTreeMap<String, McpServerConfig>) -> Result<(), ConfigError> {
    for (name, server) in servers {
        if server.command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("servers.{name}.command"),
                message: "must not be empty".into(),
            });
        }
        if server.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: format!("servers.{name}.timeout_ms"),
                message: "must be greater than zero".into(),
            });
        }
    }
    Ok(())
}

fn parse_millis(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected milliseconds, got '{value}'"),
    })
}

fn duration(key: &str, millis: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match millis {
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        }),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}
