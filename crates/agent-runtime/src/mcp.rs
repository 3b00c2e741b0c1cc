//! MCP tool-server transport
//!
//! Speaks newline-delimited JSON-RPC 2.0 with a Model Context Protocol
//! server, normally a child process on stdio. One request is in flight at a
//! time; responses are matched by id and anything else the server writes in
//! between (notifications, log lines) is skipped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use agent_core::{AgentError, Arguments, RemoteToolSpec, ToolServerSession};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How to start a tool server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Transport and protocol failures
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server closed the connection")]
    Closed,

    #[error("no response to '{0}' in time")]
    Timeout(String),

    #[error("invalid message from server: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The tool ran and reported failure
    #[error("{0}")]
    ToolFailed(String),
}

impl From<McpError> for AgentError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::ToolFailed(text) => Self::ToolExecution(text),
            McpError::Rpc { .. } => Self::ToolExecution(err.to_string()),
            other => Self::Other(format!("MCP {other}")),
        }
    }
}

type Reader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Transport {
    reader: Reader,
    writer: Writer,
}

/// A live session with one MCP server
pub struct McpSession {
    server: String,
    transport: Mutex<Transport>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    request_timeout: Duration,
}

impl McpSession {
    /// Spawn the server and complete the handshake
    pub async fn connect(server: impl Into<String>, spec: &LaunchSpec) -> Result<Self, McpError> {
        let server = server.into();
        tracing::info!(server = %server, command = %spec.command, "Spawning tool server");

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Protocol("child stdio was not captured".into()));
        };

        let session = Self::from_transport(server, stdout, stdin);
        *session.child.lock().await = Some(child);
        session.initialize().await?;
        Ok(session)
    }

    /// Wrap an already open byte stream. Call [`McpSession::initialize`]
    /// before use.
    pub fn from_transport<R, W>(server: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            server: server.into(),
            transport: Mutex::new(Transport {
                reader: BufReader::new(reader).lines(),
                writer: Box::new(writer),
            }),
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// `initialize` request followed by the `initialized` notification
    pub async fn initialize(&self) -> Result<Value, McpError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;
        self.notify("notifications/initialized", json!({})).await?;

        let remote = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(server = %self.server, remote, "Tool server connected");
        Ok(result)
    }

    /// `tools/list`
    pub async fn tools(&self) -> Result<Vec<RemoteToolSpec>, McpError> {
        let result = self.request("tools/list", json!({})).await?;
        let listed: ToolList = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("tools/list: {e}")))?;
        Ok(listed
            .tools
            .into_iter()
            .map(|t| RemoteToolSpec {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect())
    }

    /// `tools/call`; text content parts are joined with newlines
    pub async fn call(&self, name: &str, arguments: Arguments) -> Result<String, McpError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let outcome: CallResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("tools/call: {e}")))?;

        let text = outcome
            .content
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");

        if outcome.is_error {
            return Err(McpError::ToolFailed(if text.is_empty() {
                format!("{name} reported an error")
            } else {
                text
            }));
        }
        Ok(text)
    }

    /// Close the session and stop the server process, if any
    pub async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.lock().await.writer.shutdown().await.ok();
        if let Some(mut child) = self.child.lock().await.take() {
            child.kill().await?;
        }
        tracing::info!(server = %self.server, "Tool server disconnected");
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let mut transport = self.transport.lock().await;
        write_line(&mut transport.writer, &message).await?;

        let response = tokio::time::timeout(
            self.request_timeout,
            read_response(&mut transport.reader, id, &self.server),
        )
        .await
        .map_err(|_| McpError::Timeout(method.to_string()))??;

        if let Some(error) = response.get("error") {
            return Err(McpError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        let mut transport = self.transport.lock().await;
        write_line(&mut transport.writer, &message).await
    }
}

async fn write_line(writer: &mut Writer, message: &Value) -> Result<(), McpError> {
    let mut line = message.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_response(reader: &mut Reader, id: u64, server: &str) -> Result<Value, McpError> {
    while let Some(line) = reader.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(line) else {
            tracing::debug!(server, line, "Skipping non-JSON output");
            continue;
        };
        if message.get("id").and_then(Value::as_u64) == Some(id)
            && (message.get("result").is_some() || message.get("error").is_some())
        {
            return Ok(message);
        }
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        tracing::trace!(server, method, "Skipping unrelated message");
    }
    Err(McpError::Closed)
}

#[derive(Deserialize)]
struct ToolList {
    #[serde(default)]
    tools: Vec<WireTool>,
}

#[derive(Deserialize)]
struct WireTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Deserialize)]
struct CallResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[async_trait]
impl ToolServerSession for McpSession {
    async fn list_tools(&self) -> agent_core::Result<Vec<RemoteToolSpec>> {
        Ok(self.tools().await?)
    }

    async fn call_tool(&self, name: &str, arguments: Arguments) -> agent_core::Result<String> {
        Ok(self.call(name, arguments).await?)
    }

    async fn disconnect(&self) -> agent_core::Result<()> {
        Ok(self.close().await?)
    }
}
