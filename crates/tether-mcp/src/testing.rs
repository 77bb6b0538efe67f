//! Scripted transport doubles for unit tests.

use crate::config::ServerSpec;
use crate::error::McpError;
use crate::transport::{BoxFuture, Launcher, Transport};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// How the fake server answers one request.
pub(crate) enum Reply {
    Result(Value),
    Error(i64, String),
    /// Answer with a result after a delay, without blocking the caller.
    After(Duration, Value),
    /// Never answer.
    Silent,
    /// Close the stream instead of answering.
    Hangup,
}

type Handler = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

/// Request handler shared by every transport a launcher creates.
#[derive(Clone)]
pub(crate) struct FakeServer {
    handler: Handler,
}

impl FakeServer {
    pub fn custom(handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// A conforming server exposing `tools`; `on_call(name, arguments)`
    /// answers tools/call.
    pub fn with_tools(
        tools: Vec<Value>,
        on_call: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self::custom(move |method, params| match method {
            "initialize" => Reply::Result(initialize_result(json!({"tools": {}}))),
            "tools/list" => Reply::Result(json!({"tools": tools.as_slice()})),
            "tools/call" => on_call(
                params["name"].as_str().unwrap_or_default(),
                &params["arguments"],
            ),
            other => Reply::Error(-32601, format!("Method not found: {other}")),
        })
    }
}

pub(crate) fn initialize_result(capabilities: Value) -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": capabilities,
        "serverInfo": {"name": "fake", "version": "0.0.1"}
    })
}

/// A tool whose listed properties are all required strings.
pub(crate) fn tool(name: &str, required: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = required
        .iter()
        .map(|field| (field.to_string(), json!({"type": "string"})))
        .collect();
    json!({
        "name": name,
        "description": format!("The {name} tool"),
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

/// The canonical echo server: one tool, `repeat`, echoing `text`.
pub(crate) fn echo_server() -> FakeServer {
    FakeServer::with_tools(vec![tool("repeat", &["text"])], |_, args| {
        Reply::Result(json!({"content": [{"type": "text", "text": args["text"]}]}))
    })
}

pub(crate) struct FakeTransport {
    handler: Handler,
    outbox: StdMutex<Option<mpsc::UnboundedSender<Value>>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Value>>,
    sent: StdMutex<Vec<Value>>,
    unanswered: AtomicUsize,
    max_unanswered: AtomicUsize,
    closed: AtomicBool,
}

impl FakeTransport {
    fn new(handler: Handler) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handler,
            outbox: StdMutex::new(Some(tx)),
            inbox: Mutex::new(rx),
            sent: StdMutex::new(Vec::new()),
            unanswered: AtomicUsize::new(0),
            max_unanswered: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Push a server-originated message to the client.
    pub fn inject(&self, message: Value) {
        if let Some(tx) = self.outbox.lock().unwrap().as_ref() {
            tx.send(message).unwrap();
        }
    }

    /// Everything the client wrote, in order.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Client requests only: messages carrying both an id and a method.
    pub fn requests(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|m| m.get("id").is_some() && m.get("method").is_some())
            .collect()
    }

    pub fn request_methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|m| m["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn sent_notification(&self, method: &str) -> bool {
        self.sent()
            .iter()
            .any(|m| m.get("id").is_none() && m["method"] == method)
    }

    /// Peak number of requests sent but not yet answered.
    pub fn max_unanswered(&self) -> usize {
        self.max_unanswered.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn send(&self, message: Value) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(McpError::transport("fake", "closed"));
            }
            self.sent.lock().unwrap().push(message.clone());

            let (Some(id), Some(method)) = (
                message.get("id").cloned(),
                message.get("method").and_then(Value::as_str),
            ) else {
                return Ok(());
            };
            let now = self.unanswered.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_unanswered.fetch_max(now, Ordering::SeqCst);

            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let reply = (self.handler)(method, &params);
            let Some(tx) = self.outbox.lock().unwrap().clone() else {
                return Ok(());
            };
            match reply {
                Reply::Result(result) => {
                    let _ = tx.send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
                }
                Reply::Error(code, message) => {
                    let _ = tx.send(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": code, "message": message}
                    }));
                }
                Reply::After(delay, result) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
                    });
                }
                Reply::Silent => {}
                Reply::Hangup => {
                    self.outbox.lock().unwrap().take();
                }
            }
            Ok(())
        })
    }

    fn receive(&self) -> BoxFuture<'_, Result<Option<Value>, McpError>> {
        Box::pin(async move {
            let message = self.inbox.lock().await.recv().await;
            if let Some(m) = &message {
                if m.get("result").is_some() || m.get("error").is_some() {
                    self.unanswered.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Ok(message)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            self.outbox.lock().unwrap().take();
            Ok(())
        })
    }
}

/// Creates [`FakeTransport`]s and remembers them for inspection.
pub(crate) struct FakeLauncher {
    server: Option<FakeServer>,
    delay: Duration,
    attempts: AtomicUsize,
    launched: StdMutex<Vec<Arc<FakeTransport>>>,
}

impl FakeLauncher {
    pub fn new(server: FakeServer) -> Arc<Self> {
        Arc::new(Self {
            server: Some(server),
            delay: Duration::ZERO,
            attempts: AtomicUsize::new(0),
            launched: StdMutex::new(Vec::new()),
        })
    }

    /// A launcher whose every launch fails after a short delay.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            server: None,
            delay: Duration::from_millis(20),
            attempts: AtomicUsize::new(0),
            launched: StdMutex::new(Vec::new()),
        })
    }

    /// Launches take `delay` before returning.
    pub fn slow(server: FakeServer, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            server: Some(server),
            delay,
            attempts: AtomicUsize::new(0),
            launched: StdMutex::new(Vec::new()),
        })
    }

    /// Launch attempts, successful or not.
    pub fn launches(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        Arc::clone(&self.launched.lock().unwrap()[index])
    }
}

impl Launcher for FakeLauncher {
    fn launch<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, McpError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let Some(server) = &self.server else {
                return Err(McpError::Launch {
                    server: spec.name.clone(),
                    message: format!("{}: No such file or directory", spec.command),
                });
            };
            let transport = Arc::new(FakeTransport::new(Arc::clone(&server.handler)));
            self.launched.lock().unwrap().push(Arc::clone(&transport));
            Ok(transport as Arc<dyn Transport>)
        })
    }
}
