//! MCP session: one live connection to one server.
//!
//! Handles the protocol handshake (initialize + initialized notification),
//! catalog discovery (tools/list, resources/list), and tool invocation
//! (tools/call). A background reader task routes responses to waiting
//! callers by request id; issuance is serialised so that at most one request
//! is outstanding per server.

use crate::config::{ServerSpec, SessionOptions};
use crate::error::McpError;
use crate::jsonrpc::{Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, method_not_found};
use crate::schema;
use crate::transport::{Launcher, Transport};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tether_types::{ContentBlock, ResourceDescriptor, ToolDescriptor};
use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tokio::task::JoinHandle;

/// MCP protocol version we support.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// `Closed` and `Failed` accept no further operations.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// What the server said about itself during the handshake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub capabilities: Value,
    pub instructions: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    #[serde(default)]
    capabilities: Value,
    #[serde(default)]
    server_info: Option<Implementation>,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Deserialize)]
struct Implementation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[derive(Default)]
struct Catalog {
    tools: Vec<ToolDescriptor>,
    resources: Vec<ResourceDescriptor>,
    server_info: ServerInfo,
}

/// In-flight requests awaiting their response.
#[derive(Default)]
struct Pending {
    open: bool,
    slots: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
}

/// State shared with the reader task.
struct Shared {
    server: String,
    state: watch::Sender<SessionState>,
    pending: Mutex<Pending>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `to` only if the current state satisfies `from`.
    fn transition(&self, from: impl Fn(SessionState) -> bool, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if from(*state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Accept requests again, unless a disconnect has begun meanwhile.
    async fn open_pending(&self) -> bool {
        let mut pending = self.pending.lock().await;
        pending.slots.clear();
        pending.open = self.state() == SessionState::Connecting;
        pending.open
    }

    /// Refuse new requests and resolve every waiter as disconnected.
    async fn close_pending(&self) {
        let mut pending = self.pending.lock().await;
        pending.open = false;
        if !pending.slots.is_empty() {
            tracing::debug!(server = %self.server, "dropping {} in-flight request(s)", pending.slots.len());
        }
        // Dropping the senders wakes each caller with a receive error
        pending.slots.clear();
    }

    async fn dispatch(&self, message: Value, transport: &dyn Transport) {
        match Incoming::classify(message) {
            Ok(Incoming::Response(resp)) => {
                let Some(id) = resp.id else {
                    tracing::warn!(server = %self.server, "response without a numeric id ignored");
                    return;
                };
                let slot = self.pending.lock().await.slots.remove(&id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => {
                        tracing::debug!(server = %self.server, id, "discarding response for abandoned request");
                    }
                }
            }
            Ok(Incoming::Notification { method }) => {
                tracing::debug!(server = %self.server, "notification: {method}");
            }
            Ok(Incoming::Request { id, method }) => {
                tracing::debug!(server = %self.server, "declining server request: {method}");
                if let Err(e) = transport.send(method_not_found(id, &method)).await {
                    tracing::warn!(server = %self.server, "failed to answer server request: {e}");
                }
            }
            Err(e) => {
                tracing::warn!(server = %self.server, "unrecognised message: {e}");
            }
        }
    }

    /// The transport ended underneath us.
    async fn lost(&self, error: Option<McpError>) {
        let was = self.state();
        let live = self.transition(
            |s| matches!(s, SessionState::Ready | SessionState::Connecting),
            SessionState::Closing,
        );
        self.close_pending().await;
        if !live {
            return;
        }
        let end = match &error {
            Some(e) => {
                tracing::warn!(server = %self.server, "transport failed: {e}");
                SessionState::Failed
            }
            None if was == SessionState::Connecting => SessionState::Failed,
            None => {
                tracing::info!(server = %self.server, "server closed the connection");
                SessionState::Closed
            }
        };
        self.state.send_replace(end);
    }
}

async fn read_loop(transport: Arc<dyn Transport>, shared: Arc<Shared>) {
    let error = loop {
        match transport.receive().await {
            Ok(Some(message)) => shared.dispatch(message, transport.as_ref()).await,
            Ok(None) => break None,
            Err(e) => break Some(e),
        }
    };
    shared.lost(error).await;
}

struct Link {
    transport: Arc<dyn Transport>,
    reader: JoinHandle<()>,
}

/// One logical connection to one configured server.
pub struct Session {
    spec: ServerSpec,
    options: SessionOptions,
    launcher: Arc<dyn Launcher>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    link: Mutex<Option<Link>>,
    catalog: RwLock<Catalog>,
    /// Held from send until response or timeout; tokio's mutex is FIFO, so
    /// callers are serviced in submission order.
    exchange: Mutex<()>,
    connect_attempt: Mutex<()>,
    last_timeout: Mutex<Option<Instant>>,
}

impl Session {
    /// Create a disconnected session. Nothing is launched until `connect`.
    pub fn new(spec: ServerSpec, options: SessionOptions, launcher: Arc<dyn Launcher>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            options: options.for_server(&spec),
            shared: Arc::new(Shared {
                server: spec.name.clone(),
                state,
                pending: Mutex::new(Pending::default()),
            }),
            spec,
            launcher,
            next_id: AtomicU64::new(1),
            link: Mutex::new(None),
            catalog: RwLock::new(Catalog::default()),
            exchange: Mutex::new(()),
            connect_attempt: Mutex::new(()),
            last_timeout: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Launch the server, handshake, and discover its catalog.
    ///
    /// A no-op when already `Ready`. Retries from `Disconnected` or `Failed`;
    /// a closed session stays closed.
    pub async fn connect(&self) -> Result<(), McpError> {
        let _attempt = self.connect_attempt.lock().await;
        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Closing | SessionState::Closed => {
                return Err(McpError::not_connected(self.name()));
            }
            SessionState::Disconnected | SessionState::Connecting | SessionState::Failed => {}
        }

        // A failed attempt may have left its process behind
        if let Err(e) = self.teardown_link().await {
            tracing::debug!(server = %self.name(), "closing stale transport: {e}");
        }
        self.shared.state.send_replace(SessionState::Connecting);

        match self.establish().await {
            Ok(tool_count) => {
                if self
                    .shared
                    .transition(|s| s == SessionState::Connecting, SessionState::Ready)
                {
                    tracing::info!("MCP server '{}' connected with {} tools", self.name(), tool_count);
                    Ok(())
                } else {
                    // Disconnected while the handshake was running
                    if let Err(e) = self.teardown_link().await {
                        tracing::debug!(server = %self.name(), "closing abandoned transport: {e}");
                    }
                    Err(McpError::not_connected(self.name()))
                }
            }
            Err(e) => {
                if let Err(close_err) = self.teardown_link().await {
                    tracing::debug!(server = %self.name(), "closing failed transport: {close_err}");
                }
                self.shared.transition(
                    |s| matches!(s, SessionState::Connecting | SessionState::Closing),
                    SessionState::Failed,
                );
                tracing::warn!("Failed to connect to MCP server '{}': {}", self.name(), e);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<usize, McpError> {
        let transport = self.launcher.launch(&self.spec).await?;
        let reader = tokio::spawn(read_loop(Arc::clone(&transport), Arc::clone(&self.shared)));
        // Stored before reopening, so a concurrent disconnect either sees the
        // link or leaves the pending table closed
        *self.link.lock().await = Some(Link { transport, reader });
        if !self.shared.open_pending().await {
            self.teardown_link().await?;
            return Err(McpError::not_connected(self.name()));
        }

        let _turn = self.exchange.lock().await;

        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "tether",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let init = self
            .request("initialize", Some(init_params), self.options.handshake_timeout)
            .await
            .map_err(|e| self.connect_error(e.to_string()))?;
        let server_info = parse_server_info(init).map_err(|reason| self.connect_error(reason))?;
        if server_info.protocol_version != PROTOCOL_VERSION {
            tracing::debug!(
                server = %self.name(),
                "server speaks protocol {}, client requested {}",
                server_info.protocol_version,
                PROTOCOL_VERSION
            );
        }

        self.notify("notifications/initialized", None)
            .await
            .map_err(|e| self.connect_error(e.to_string()))?;

        let tools: Vec<ToolDescriptor> = self
            .fetch_pages("tools/list", "tools")
            .await
            .map_err(|e| self.connect_error(format!("tool discovery failed: {e}")))?;

        let resources = if server_info.capabilities.get("resources").is_some() {
            self.fetch_pages("resources/list", "resources")
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(server = %self.name(), "resource discovery failed: {e}");
                    Vec::new()
                })
        } else {
            Vec::new()
        };

        let tool_count = tools.len();
        *self.catalog.write().await = Catalog {
            tools,
            resources,
            server_info,
        };
        Ok(tool_count)
    }

    /// Cached tool catalog, in server order.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.ensure_ready()?;
        Ok(self.catalog.read().await.tools.clone())
    }

    /// Cached resource catalog; empty when the server has no resources.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        self.ensure_ready()?;
        Ok(self.catalog.read().await.resources.clone())
    }

    pub async fn server_info(&self) -> Result<ServerInfo, McpError> {
        self.ensure_ready()?;
        Ok(self.catalog.read().await.server_info.clone())
    }

    /// Number of cached tools, whatever the state.
    pub async fn tool_count(&self) -> usize {
        self.catalog.read().await.tools.len()
    }

    /// Look up one tool in the cached catalog.
    pub async fn describe_tool(&self, tool: &str) -> Result<ToolDescriptor, McpError> {
        self.ensure_ready()?;
        self.catalog
            .read()
            .await
            .tools
            .iter()
            .find(|t| t.name == tool)
            .cloned()
            .ok_or_else(|| McpError::UnknownTool {
                server: self.name().to_string(),
                tool: tool.to_string(),
            })
    }

    /// Re-run tool discovery and replace the cached catalog.
    pub async fn refresh_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.ensure_ready()?;
        let tools: Vec<ToolDescriptor> = {
            let _turn = self.exchange.lock().await;
            self.ensure_ready()?;
            self.fetch_pages("tools/list", "tools").await?
        };
        self.catalog.write().await.tools = tools.clone();
        tracing::debug!(server = %self.name(), "refreshed catalog: {} tools", tools.len());
        Ok(tools)
    }

    /// Call a tool on this server.
    ///
    /// Unknown tools and arguments that fail the schema pre-check are
    /// rejected without sending anything.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Vec<ContentBlock>, McpError> {
        let tool = self.describe_tool(tool_name).await?;
        schema::check_arguments(&tool.input_schema, &arguments).map_err(|message| {
            McpError::InvalidArguments {
                tool: tool_name.to_string(),
                message,
            }
        })?;
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let outcome = {
            let _turn = self.exchange.lock().await;
            self.ensure_ready()?;
            self.request("tools/call", Some(params), self.options.call_timeout)
                .await
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e @ McpError::Timeout { .. }) => {
                self.note_timeout().await;
                return Err(e);
            }
            Err(e @ (McpError::JsonRpc { .. } | McpError::Protocol { .. })) => {
                self.clear_timeouts().await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.clear_timeouts().await;

        let call: CallToolResult = serde_json::from_value(result).map_err(|e| {
            McpError::protocol(self.name(), format!("Failed to parse tools/call result: {e}"))
        })?;

        if call.is_error {
            let text: Vec<&str> = call.content.iter().filter_map(ContentBlock::as_text).collect();
            let message = if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text.join("\n")
            };
            return Err(McpError::ToolFailed {
                server: self.name().to_string(),
                tool: tool_name.to_string(),
                message,
            });
        }

        Ok(call.content)
    }

    /// Close the session. Idempotent; in-flight calls resolve as not connected.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        if self.state().is_terminal() {
            return Ok(());
        }
        self.shared.state.send_replace(SessionState::Closing);
        self.shared.close_pending().await;
        let closed = self.teardown_link().await;
        self.shared.state.send_replace(SessionState::Closed);
        tracing::info!(server = %self.name(), "disconnected");
        closed
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        if self.state() == SessionState::Ready {
            Ok(())
        } else {
            Err(McpError::not_connected(self.name()))
        }
    }

    fn connect_error(&self, reason: impl Into<String>) -> McpError {
        McpError::Connect {
            server: self.name().to_string(),
            reason: reason.into(),
        }
    }

    async fn transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| Arc::clone(&link.transport))
            .ok_or_else(|| McpError::not_connected(self.name()))
    }

    async fn teardown_link(&self) -> Result<(), McpError> {
        let link = self.link.lock().await.take();
        match link {
            Some(link) => {
                link.reader.abort();
                link.transport.close().await
            }
            None => Ok(()),
        }
    }

    /// Send one request and wait for its result. Callers hold `exchange`.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let transport = self.transport().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            if !pending.open {
                return Err(McpError::not_connected(self.name()));
            }
            pending.slots.insert(id, tx);
        }

        let request = serde_json::to_value(JsonRpcRequest::new(id, method, params))
            .map_err(|e| McpError::protocol(self.name(), e.to_string()))?;
        tracing::debug!(server = %self.name(), id, "-> {method}");

        if let Err(e) = transport.send(request).await {
            self.shared.pending.lock().await.slots.remove(&id);
            self.shared.lost(Some(e.clone())).await;
            return Err(e);
        }

        let resp = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(McpError::not_connected(self.name())),
            Err(_) => {
                // Clean up pending entry on timeout; a late reply is discarded
                self.shared.pending.lock().await.slots.remove(&id);
                return Err(McpError::Timeout {
                    server: self.name().to_string(),
                    method: method.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        if let Some(err) = resp.error {
            return Err(McpError::JsonRpc {
                server: self.name().to_string(),
                code: err.code,
                message: err.message,
            });
        }
        resp.result.ok_or_else(|| {
            McpError::protocol(self.name(), format!("{method} response has neither result nor error"))
        })
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = serde_json::to_value(JsonRpcNotification::new(method, params))
            .map_err(|e| McpError::protocol(self.name(), e.to_string()))?;
        self.transport().await?.send(notification).await
    }

    /// Run a paginated list request, following `nextCursor` to the end.
    async fn fetch_pages<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let mut page = self.request(method, params, self.options.call_timeout).await?;

            let entries = page.get_mut(key).map(Value::take).unwrap_or(Value::Array(Vec::new()));
            let batch: Vec<T> = serde_json::from_value(entries).map_err(|e| {
                McpError::protocol(self.name(), format!("Failed to parse {method} response: {e}"))
            })?;
            items.extend(batch);

            match page.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next) => {
                    cursor = Some(next.to_string());
                }
                _ => break,
            }
        }
        Ok(items)
    }

    async fn note_timeout(&self) {
        let now = Instant::now();
        let wedged = {
            let mut last = self.last_timeout.lock().await;
            let wedged = last.is_some_and(|prev| now.duration_since(prev) <= self.options.wedge_window);
            *last = Some(now);
            wedged
        };
        if wedged {
            tracing::warn!(
                server = %self.name(),
                "second timeout within {:?}, closing wedged session",
                self.options.wedge_window
            );
            if let Err(e) = self.disconnect().await {
                tracing::warn!(server = %self.name(), "error closing wedged session: {e}");
            }
        } else {
            tracing::warn!(server = %self.name(), "call timed out; session kept open");
        }
    }

    async fn clear_timeouts(&self) {
        *self.last_timeout.lock().await = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The reader holds the transport; stopping it lets kill_on_drop reap the child
        if let Some(link) = self.link.get_mut().take() {
            link.reader.abort();
        }
    }
}

fn parse_server_info(result: Value) -> Result<ServerInfo, String> {
    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| format!("malformed initialize response: {e}"))?;
    let (name, version) = init
        .server_info
        .map(|info| (info.name, info.version))
        .unwrap_or_default();
    Ok(ServerInfo {
        name,
        version,
        protocol_version: init.protocol_version,
        capabilities: init.capabilities,
        instructions: init.instructions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, FakeServer, Reply, echo_server, tool};
    use serde_json::json;
    use tether_types::ErrorKind;

    fn options(call_ms: u64) -> SessionOptions {
        SessionOptions {
            call_timeout: Duration::from_millis(call_ms),
            handshake_timeout: Duration::from_millis(200),
            wedge_window: Duration::from_secs(60),
        }
    }

    fn session_with(launcher: &Arc<FakeLauncher>, call_ms: u64) -> Session {
        let spec = ServerSpec::new("echo", "echo-server", vec![]);
        Session::new(spec, options(call_ms), Arc::clone(launcher) as Arc<dyn Launcher>)
    }

    #[tokio::test]
    async fn connect_discovers_tools_in_server_order() {
        let server = FakeServer::with_tools(
            vec![tool("zeta", &[]), tool("alpha", &[]), tool("mid", &[])],
            |_, _| Reply::Result(json!({"content": []})),
        );
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 500);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        let names: Vec<String> = session
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);

        let transport = launcher.transport(0);
        assert_eq!(transport.request_methods(), vec!["initialize", "tools/list"]);
        assert!(transport.sent_notification("notifications/initialized"));
        let info = session.server_info().await.unwrap();
        assert_eq!(info.name, "fake");
        assert_eq!(info.protocol_version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn connecting_twice_launches_once() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(launcher.launches(), 1);
        assert_eq!(launcher.transport(0).request_methods().len(), 2);
    }

    #[tokio::test]
    async fn call_returns_tool_content() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();

        let content = session.call_tool("repeat", json!({"text": "hi"})).await.unwrap();
        assert_eq!(content, vec![ContentBlock::text("hi")]);

        let sent = launcher.transport(0).requests();
        let call = sent.last().unwrap();
        assert_eq!(call["method"], "tools/call");
        assert_eq!(call["params"]["name"], "repeat");
        assert_eq!(call["params"]["arguments"]["text"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_sends_nothing() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();
        let before = launcher.transport(0).requests().len();

        let err = session.call_tool("shout", json!({})).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownTool);
        assert_eq!(launcher.transport(0).requests().len(), before);
    }

    #[tokio::test]
    async fn invalid_arguments_send_nothing() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();
        let before = launcher.transport(0).requests().len();

        let missing = session.call_tool("repeat", json!({})).await.unwrap_err();
        let wrong_kind = session.call_tool("repeat", json!({"text": 5})).await.unwrap_err();

        assert_eq!(missing.kind(), ErrorKind::InvalidArguments);
        assert_eq!(wrong_kind.kind(), ErrorKind::InvalidArguments);
        assert_eq!(launcher.transport(0).requests().len(), before);
    }

    #[tokio::test]
    async fn tool_errors_are_server_errors() {
        let server = FakeServer::with_tools(vec![tool("fail", &[]), tool("rpc", &[])], |name, _| {
            if name == "fail" {
                Reply::Result(json!({
                    "content": [{"type": "text", "text": "disk on fire"}],
                    "isError": true
                }))
            } else {
                Reply::Error(-32000, "internal".to_string())
            }
        });
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();

        match session.call_tool("fail", json!({})).await.unwrap_err() {
            McpError::ToolFailed { message, .. } => assert_eq!(message, "disk on fire"),
            other => panic!("Expected ToolFailed, got: {other:?}"),
        }
        let rpc = session.call_tool("rpc", json!({})).await.unwrap_err();
        assert_eq!(rpc.kind(), ErrorKind::ServerError);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn concurrent_calls_are_issued_one_at_a_time() {
        let server = FakeServer::with_tools(vec![tool("repeat", &["text"])], |_, args| {
            Reply::After(
                Duration::from_millis(20),
                json!({"content": [{"type": "text", "text": args["text"]}]}),
            )
        });
        let launcher = FakeLauncher::new(server);
        let session = Arc::new(session_with(&launcher, 2000));
        session.connect().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                let text = format!("call-{i}");
                let content = session.call_tool("repeat", json!({"text": text})).await.unwrap();
                (text, content)
            }));
        }
        for handle in handles {
            let (text, content) = handle.await.unwrap();
            assert_eq!(content, vec![ContentBlock::text(text)]);
        }

        assert_eq!(launcher.transport(0).max_unanswered(), 1);
    }

    #[tokio::test]
    async fn request_ids_strictly_increase() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();
        session.call_tool("repeat", json!({"text": "a"})).await.unwrap();
        session.call_tool("repeat", json!({"text": "b"})).await.unwrap();

        let ids: Vec<u64> = launcher
            .transport(0)
            .requests()
            .iter()
            .filter_map(|r| r["id"].as_u64())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn second_timeout_closes_session() {
        let server = FakeServer::with_tools(vec![tool("hang", &[])], |_, _| Reply::Silent);
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 50);
        session.connect().await.unwrap();

        let first = session.call_tool("hang", json!({})).await.unwrap_err();
        assert_eq!(first.kind(), ErrorKind::Timeout);
        assert_eq!(session.state(), SessionState::Ready);

        let second = session.call_tool("hang", json!({})).await.unwrap_err();
        assert_eq!(second.kind(), ErrorKind::Timeout);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(launcher.transport(0).is_closed());

        let sent = launcher.transport(0).requests().len();
        let after = session.call_tool("hang", json!({})).await.unwrap_err();
        assert_eq!(after.kind(), ErrorKind::NotConnected);
        assert_eq!(launcher.transport(0).requests().len(), sent);
    }

    #[tokio::test]
    async fn success_between_timeouts_resets_wedge_detection() {
        let server = FakeServer::with_tools(vec![tool("hang", &[]), tool("ok", &[])], |name, _| {
            if name == "hang" {
                Reply::Silent
            } else {
                Reply::Result(json!({"content": []}))
            }
        });
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 50);
        session.connect().await.unwrap();

        assert!(session.call_tool("hang", json!({})).await.is_err());
        session.call_tool("ok", json!({})).await.unwrap();
        assert!(session.call_tool("hang", json!({})).await.is_err());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn late_response_is_discarded() {
        let server = FakeServer::with_tools(vec![tool("slow", &[]), tool("fast", &[])], |name, _| {
            if name == "slow" {
                Reply::After(
                    Duration::from_millis(300),
                    json!({"content": [{"type": "text", "text": "late"}]}),
                )
            } else {
                Reply::After(
                    Duration::from_millis(150),
                    json!({"content": [{"type": "text", "text": "fast"}]}),
                )
            }
        });
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 200);
        session.connect().await.unwrap();

        let err = session.call_tool("slow", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // The late "slow" reply lands while "fast" is waiting
        let content = session.call_tool("fast", json!({})).await.unwrap();
        assert_eq!(content, vec![ContentBlock::text("fast")]);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn end_of_stream_resolves_pending_call() {
        let server = FakeServer::with_tools(vec![tool("crash", &[])], |_, _| Reply::Hangup);
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 2000);
        session.connect().await.unwrap();

        let started = Instant::now();
        let err = session.call_tool("crash", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(started.elapsed() < Duration::from_secs(1));

        // The reader settles the final state right after draining
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn handshake_timeout_fails_session() {
        let server = FakeServer::custom(|_, _| Reply::Silent);
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 500);

        let err = session.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(err.to_string().contains("timed out"));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(launcher.transport(0).is_closed());
        assert_eq!(session.list_tools().await.unwrap_err().kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn malformed_handshake_fails_and_can_retry() {
        let server = FakeServer::custom(|method, _| match method {
            "initialize" => Reply::Result(json!({"capabilities": {}})),
            _ => Reply::Silent,
        });
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 500);

        let err = session.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(err.to_string().contains("malformed"));
        assert_eq!(session.state(), SessionState::Failed);

        assert!(session.connect().await.is_err());
        assert_eq!(launcher.launches(), 2);
    }

    #[tokio::test]
    async fn launch_failure_fails_session() {
        let launcher = FakeLauncher::failing();
        let session = session_with(&launcher, 500);
        let err = session.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Launch);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn closed_session_refuses_everything() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();
        let sent = launcher.transport(0).requests().len();

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(launcher.transport(0).is_closed());
        let err = session.call_tool("repeat", json!({"text": "hi"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(session.connect().await.unwrap_err().kind(), ErrorKind::NotConnected);
        assert_eq!(launcher.transport(0).requests().len(), sent);
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn disconnect_during_launch_closes_the_late_transport() {
        let launcher = FakeLauncher::slow(echo_server(), Duration::from_millis(100));
        let session = Arc::new(session_with(&launcher, 500));

        let connecting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.disconnect().await.unwrap();

        let err = connecting.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(launcher.launches(), 1);
        let transport = launcher.transport(0);
        assert!(transport.is_closed());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn tool_discovery_follows_cursors() {
        let server = FakeServer::custom(|method, params| match method {
            "initialize" => Reply::Result(crate::testing::initialize_result(json!({"tools": {}}))),
            "tools/list" => match params.get("cursor").and_then(Value::as_str) {
                None => Reply::Result(json!({"tools": [tool("a", &[])], "nextCursor": "p2"})),
                Some("p2") => Reply::Result(json!({"tools": [tool("b", &[])]})),
                Some(_) => Reply::Error(-32602, "bad cursor".to_string()),
            },
            _ => Reply::Silent,
        });
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();

        let names: Vec<String> = session.list_tools().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn resources_discovered_when_advertised() {
        let server = FakeServer::custom(|method, _| match method {
            "initialize" => Reply::Result(crate::testing::initialize_result(
                json!({"tools": {}, "resources": {}}),
            )),
            "tools/list" => Reply::Result(json!({"tools": []})),
            "resources/list" => Reply::Result(json!({"resources": [
                {"uri": "file:///tmp/a.txt", "name": "a.txt", "mimeType": "text/plain"}
            ]})),
            _ => Reply::Silent,
        });
        let launcher = FakeLauncher::new(server);
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();

        let resources = session.list_resources().await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].mime_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn refresh_replaces_catalog() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();

        let tools = session.refresh_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(
            launcher.transport(0).request_methods(),
            vec!["initialize", "tools/list", "tools/list"]
        );
    }

    #[tokio::test]
    async fn server_requests_are_declined() {
        let launcher = FakeLauncher::new(echo_server());
        let session = session_with(&launcher, 500);
        session.connect().await.unwrap();

        launcher
            .transport(0)
            .inject(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reply = launcher
            .transport(0)
            .sent()
            .into_iter()
            .find(|m| m["id"] == "srv-1")
            .unwrap();
        assert_eq!(reply["error"]["code"], crate::jsonrpc::METHOD_NOT_FOUND);
        assert_eq!(session.state(), SessionState::Ready);
    }
}
