//! Connection and invocation layer for MCP tool servers.
//!
//! Each configured server is a child process speaking newline-delimited
//! JSON-RPC 2.0 on stdio. A [`Session`] owns one such process, performs the
//! handshake, caches the tool catalog and serialises calls. The [`Registry`]
//! owns every session, and the [`Invoker`] is the façade the front end drives.

pub mod config;
pub mod error;
pub mod invoker;
pub mod jsonrpc;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{McpConfig, ServerSpec, SessionOptions};
pub use error::McpError;
pub use invoker::{Invoker, ServerStatus};
pub use registry::Registry;
pub use session::{ServerInfo, Session, SessionState};
pub use transport::{Launcher, StdioLauncher, StdioTransport, Transport};
