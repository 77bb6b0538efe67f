//! Invoker: the operations a front end drives, with uniform outcomes.
//!
//! Every method resolves the server through the [`Registry`], forwards to
//! its session for exactly one operation and renders the result as an
//! [`Outcome`] or a [`ToolCallResult`]. Errors are never swallowed: each one
//! reaches the caller as a [`Failure`] carrying its [`ErrorKind`].
//!
//! [`ErrorKind`]: tether_types::ErrorKind

use crate::registry::Registry;
use crate::session::ServerInfo;
use serde_json::Value;
use tether_types::{
    ErrorKind, ExtractedContent, ExtractionError, Failure, Outcome, ReadOptions,
    ResourceDescriptor, ToolCallResult, ToolDescriptor,
};

/// One configured server as shown by `servers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub name: String,
    pub command: String,
    pub connected: bool,
    /// Cached tool count; zero unless connected.
    pub tool_count: usize,
}

pub struct Invoker {
    registry: Registry,
}

impl Invoker {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Configured servers in name order, with live status. Never launches.
    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        let mut servers = Vec::new();
        for spec in self.registry.specs() {
            let session = self.registry.session(&spec.name).await;
            let tool_count = match &session {
                Some(session) => session.tool_count().await,
                None => 0,
            };
            servers.push(ServerStatus {
                name: spec.name.clone(),
                command: spec.command_line(),
                connected: session.is_some(),
                tool_count,
            });
        }
        servers
    }

    pub async fn connect(&self, server: &str) -> Outcome<ServerInfo> {
        let session = self.registry.get_or_connect(server).await?;
        Ok(session.server_info().await?)
    }

    pub async fn list_tools(&self, server: &str) -> Outcome<Vec<ToolDescriptor>> {
        let session = self.registry.get_or_connect(server).await?;
        Ok(session.list_tools().await?)
    }

    pub async fn describe_tool(&self, server: &str, tool: &str) -> Outcome<ToolDescriptor> {
        let session = self.registry.get_or_connect(server).await?;
        Ok(session.describe_tool(tool).await?)
    }

    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> ToolCallResult {
        let outcome = match self.registry.get_or_connect(server).await {
            Ok(session) => session.call_tool(tool, arguments).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(content) => ToolCallResult::Success(content),
            Err(e) => {
                tracing::debug!(server, tool, "call failed: {e}");
                ToolCallResult::Failure(e.into())
            }
        }
    }

    pub async fn list_resources(&self, server: &str) -> Outcome<Vec<ResourceDescriptor>> {
        let session = self.registry.get_or_connect(server).await?;
        Ok(session.list_resources().await?)
    }

    pub async fn refresh_tools(&self, server: &str) -> Outcome<Vec<ToolDescriptor>> {
        let session = self.registry.get_or_connect(server).await?;
        Ok(session.refresh_tools().await?)
    }

    pub async fn disconnect(&self, server: &str) -> Outcome<()> {
        Ok(self.registry.disconnect(server).await?)
    }

    /// Close every server. Failures are reported, not raised.
    pub async fn shutdown(&self) -> Vec<Failure> {
        self.registry
            .disconnect_all()
            .await
            .into_iter()
            .map(|(_, e)| e.into())
            .collect()
    }

    /// Read a document through a server's `read`-style tool.
    ///
    /// Errors the server reports become extraction failures; connection
    /// problems pass through unchanged.
    pub async fn read_document(
        &self,
        server: &str,
        tool: &str,
        path: &str,
        options: &ReadOptions,
    ) -> Outcome<ExtractedContent> {
        match self.call_tool(server, tool, options.to_arguments(path)).await {
            ToolCallResult::Success(content) => ExtractedContent::from_blocks(&content)
                .map_err(|e| Failure::new(ErrorKind::ServerError, e.to_string())),
            ToolCallResult::Failure(failure) if failure.kind == ErrorKind::ServerError => Err(
                Failure::new(failure.kind, ExtractionError::Failed(failure.message).to_string()),
            ),
            ToolCallResult::Failure(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerSpec, SessionOptions};
    use crate::testing::{FakeLauncher, FakeServer, Reply, echo_server, tool};
    use crate::transport::Launcher;
    use serde_json::json;
    use std::sync::Arc;
    use tether_types::ContentBlock;

    fn invoker(launcher: &Arc<FakeLauncher>) -> Invoker {
        let specs = vec![
            ServerSpec::new("echo", "echo-server", vec!["--stdio".to_string()]),
            ServerSpec::new("docs", "doc-server", vec![]),
        ];
        Invoker::new(Registry::new(
            specs,
            Arc::clone(launcher) as Arc<dyn Launcher>,
            SessionOptions::default(),
        ))
    }

    fn document_server() -> FakeServer {
        let read = json!({
            "name": "read_file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "summarize": {"type": "boolean"},
                    "max_length": {"type": "integer"}
                },
                "required": ["path"]
            }
        });
        FakeServer::with_tools(vec![read], |_, args| {
            if args["path"] == "missing.pdf" {
                return Reply::Result(json!({
                    "content": [{"type": "text", "text": "File not found: missing.pdf"}],
                    "isError": true
                }));
            }
            let body = json!({
                "content": format!("text of {}", args["path"].as_str().unwrap_or_default()),
                "metadata": {"pages": 3, "summarized": args["summarize"] == true}
            });
            Reply::Result(json!({"content": [{"type": "text", "text": body.to_string()}]}))
        })
    }

    #[tokio::test]
    async fn unknown_server_fails_every_operation_without_launch() {
        let launcher = FakeLauncher::new(echo_server());
        let invoker = invoker(&launcher);

        assert_eq!(invoker.connect("nope").await.unwrap_err().kind, ErrorKind::UnknownServer);
        assert_eq!(invoker.list_tools("nope").await.unwrap_err().kind, ErrorKind::UnknownServer);
        assert_eq!(
            invoker.describe_tool("nope", "repeat").await.unwrap_err().kind,
            ErrorKind::UnknownServer
        );
        let call = invoker.call_tool("nope", "repeat", json!({"text": "hi"})).await;
        assert_eq!(call.failure().unwrap().kind, ErrorKind::UnknownServer);
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let launcher = FakeLauncher::new(echo_server());
        let invoker = invoker(&launcher);

        let result = invoker.call_tool("echo", "repeat", json!({"text": "hi"})).await;

        assert_eq!(result, ToolCallResult::Success(vec![ContentBlock::text("hi")]));
        assert_eq!(
            result.to_json(),
            json!({"content": [{"type": "text", "text": "hi"}]})
        );
    }

    #[tokio::test]
    async fn list_servers_reflects_connections() {
        let launcher = FakeLauncher::new(echo_server());
        let invoker = invoker(&launcher);

        let before = invoker.list_servers().await;
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].name, "docs");
        assert!(before.iter().all(|s| !s.connected));
        assert_eq!(launcher.launches(), 0);

        invoker.connect("echo").await.unwrap();
        let after = invoker.list_servers().await;
        assert_eq!(
            after[1],
            ServerStatus {
                name: "echo".to_string(),
                command: "echo-server --stdio".to_string(),
                connected: true,
                tool_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn describe_tool_returns_schema() {
        let launcher = FakeLauncher::new(echo_server());
        let invoker = invoker(&launcher);

        let repeat = invoker.describe_tool("echo", "repeat").await.unwrap();
        assert_eq!(repeat.required_arguments(), vec!["text"]);
        let missing = invoker.describe_tool("echo", "shout").await.unwrap_err();
        assert_eq!(missing.kind, ErrorKind::UnknownTool);
    }

    #[tokio::test]
    async fn failures_keep_their_kind() {
        let server = FakeServer::with_tools(vec![tool("repeat", &["text"])], |_, _| {
            Reply::Error(-32603, "boom".to_string())
        });
        let launcher = FakeLauncher::new(server);
        let invoker = invoker(&launcher);

        let invalid = invoker.call_tool("echo", "repeat", json!({"text": 1})).await;
        assert_eq!(invalid.failure().unwrap().kind, ErrorKind::InvalidArguments);

        let remote = invoker.call_tool("echo", "repeat", json!({"text": "x"})).await;
        let failure = remote.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::ServerError);
        assert!(failure.message.contains("boom"));
        assert!(remote.content().is_empty());
    }

    #[tokio::test]
    async fn disconnect_then_call_launches_again() {
        let launcher = FakeLauncher::new(echo_server());
        let invoker = invoker(&launcher);

        invoker.connect("echo").await.unwrap();
        invoker.disconnect("echo").await.unwrap();
        assert!(!invoker.list_servers().await[1].connected);

        let result = invoker.call_tool("echo", "repeat", json!({"text": "again"})).await;
        assert!(result.is_success());
        assert_eq!(launcher.launches(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_all_sessions() {
        let launcher = FakeLauncher::new(echo_server());
        let invoker = invoker(&launcher);
        invoker.connect("echo").await.unwrap();
        invoker.connect("docs").await.unwrap();

        assert!(invoker.shutdown().await.is_empty());
        assert!(launcher.transport(0).is_closed());
        assert!(launcher.transport(1).is_closed());
        assert!(invoker.list_servers().await.iter().all(|s| !s.connected));
    }

    #[tokio::test]
    async fn read_document_decodes_structured_text() {
        let launcher = FakeLauncher::new(document_server());
        let invoker = invoker(&launcher);
        let options = ReadOptions {
            summarize: Some(true),
            ..ReadOptions::default()
        };

        let doc = invoker
            .read_document("docs", "read_file", "report.pdf", &options)
            .await
            .unwrap();
        assert_eq!(doc.content, "text of report.pdf");
        assert_eq!(doc.metadata["pages"], 3);
        assert_eq!(doc.metadata["summarized"], true);

        let missing = invoker
            .read_document("docs", "read_file", "missing.pdf", &ReadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(missing.kind, ErrorKind::ServerError);
        assert!(missing.message.starts_with("Extraction failed: "));
        assert!(missing.message.contains("File not found"));

        let err = invoker
            .read_document("nowhere", "read_file", "a.txt", &ReadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownServer);
        assert!(!err.message.starts_with("Extraction failed"));
    }
}
