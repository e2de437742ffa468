use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::WorkerConfig;
use crate::error::{ToolError, ToolResult};
use crate::tools::{ToolFacade, tool_definitions};

const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
const PROTOCOL_VERSION: &str = "2024-11-05";
// npx may fetch the package on first start
const MIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(120);

// === Framing ===
// Both newline-delimited JSON and LSP-style Content-Length frames are seen
// in the wild. Replies use whatever framing the peer used.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Line,
    ContentLength,
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Read one message. `Ok(None)` means end of stream. Unparseable payloads
/// are `InvalidData` errors and leave the stream positioned at the next
/// message.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<(Value, Framing)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut first_line = String::new();
    loop {
        first_line.clear();
        if reader.read_line(&mut first_line).await? == 0 {
            return Ok(None);
        }
        if !first_line.trim().is_empty() {
            break;
        }
    }
    if first_line.len() > MAX_MESSAGE_BYTES {
        return Err(invalid_data(format!("message too large ({} bytes)", first_line.len())));
    }

    if !first_line.to_ascii_lowercase().starts_with("content-length:") {
        let value = serde_json::from_str(first_line.trim())
            .map_err(|e| invalid_data(format!("invalid json: {e}")))?;
        return Ok(Some((value, Framing::Line)));
    }

    let mut content_length = parse_length(&first_line);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            break;
        }
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = parse_length(&line).or(content_length);
        }
    }

    let len = content_length.ok_or_else(|| invalid_data("missing Content-Length".to_string()))?;
    if len > MAX_MESSAGE_BYTES {
        return Err(invalid_data(format!("message too large ({len} bytes)")));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let value = serde_json::from_slice(&body).map_err(|e| invalid_data(format!("invalid json: {e}")))?;
    Ok(Some((value, Framing::ContentLength)))
}

fn parse_length(header: &str) -> Option<usize> {
    header.split(':').nth(1).and_then(|v| v.trim().parse::<usize>().ok())
}

pub async fn write_message<W>(writer: &mut W, value: &Value, framing: Framing) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(value).map_err(|e| invalid_data(e.to_string()))?;
    match framing {
        Framing::Line => {
            writer.write_all(&payload).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            writer
                .write_all(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes())
                .await?;
            writer.write_all(&payload).await?;
        }
    }
    writer.flush().await
}

// === Worker client ===
// One long-lived MCP server child. Requests carry increasing ids and a reader
// task routes each response to the caller waiting on that id, so calls from
// different tasks run concurrently over the one pipe.

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
pub(crate) type WorkerInput = Box<dyn AsyncWrite + Send + Unpin>;

pub struct McpWorker {
    name: String,
    stdin: AsyncMutex<WorkerInput>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    timeout: Duration,
    tools: Vec<Value>,
    _child: Option<Child>,
}

impl std::fmt::Debug for McpWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpWorker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Removes the pending slot when the caller stops waiting, for any reason.
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl McpWorker {
    /// Spawn the worker, run the `initialize` handshake and discover its
    /// tools. Every failure here is [`ToolError::BridgeUnavailable`].
    pub async fn start(config: &WorkerConfig) -> ToolResult<Self> {
        let name = config.name.clone();
        let unavailable = |msg: String| ToolError::BridgeUnavailable(format!("worker '{name}': {msg}"));

        let parts = config.command_line().map_err(ToolError::BridgeUnavailable)?;
        let mut cmd = Command::new(&parts[0]);
        cmd.args(&parts[1..])
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| unavailable(format!("spawn: {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| unavailable("no stdin".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| unavailable("no stdout".to_string()))?;

        // Drain stderr so the pipe never fills and blocks the worker.
        if let Some(stderr) = child.stderr.take() {
            let worker = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::warn!(worker = %worker, "stderr: {line}");
                    }
                }
            });
        }

        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self::connect(&name, stdout, Box::new(stdin), timeout, Some(child)).await
    }

    /// Handshake over an already open pair of streams. `child`, when given,
    /// is killed with the worker.
    pub(crate) async fn connect<R>(
        name: &str,
        output: R,
        input: WorkerInput,
        timeout: Duration,
        child: Option<Child>,
    ) -> ToolResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let unavailable = |msg: String| ToolError::BridgeUnavailable(format!("worker '{name}': {msg}"));

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(route_responses(
            name.to_string(),
            BufReader::new(output),
            pending.clone(),
            closed.clone(),
        ));

        let mut worker = McpWorker {
            name: name.to_string(),
            stdin: AsyncMutex::new(input),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            timeout,
            tools: Vec::new(),
            _child: child,
        };

        let handshake = worker.timeout.max(MIN_HANDSHAKE_TIMEOUT);
        worker
            .request_within(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "vaultbridge", "version": env!("CARGO_PKG_VERSION") }
                }),
                handshake,
            )
            .await
            .map_err(|e| unavailable(format!("initialize failed: {}", detail(e))))?;
        worker
            .notify("notifications/initialized")
            .await
            .map_err(|e| unavailable(detail(e)))?;

        let listed = worker
            .request_within("tools/list", json!({}), handshake)
            .await
            .map_err(|e| unavailable(format!("tools/list failed: {}", detail(e))))?;
        worker.tools = listed
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        tracing::info!(worker = %name, tools = worker.tools.len(), "worker ready");

        Ok(worker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tool descriptors from `tools/list`.
    pub fn tools(&self) -> &[Value] {
        &self.tools
    }

    /// False once the worker's stdout has closed. A dead worker is not
    /// restarted.
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn exited(&self) -> ToolError {
        ToolError::BridgeUnavailable(format!("worker '{}' has exited", self.name))
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools
            .iter()
            .any(|t| t.get("name").and_then(|n| n.as_str()) == Some(tool))
    }

    /// Call one worker tool and return its text content.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> ToolResult<String> {
        let result = self
            .request("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await?;

        let text = match result.get("content").and_then(|c| c.as_array()) {
            Some(items) => {
                let parts: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                    .collect();
                if parts.is_empty() {
                    result.to_string()
                } else {
                    parts.join("\n")
                }
            }
            None => result.to_string(),
        };
        if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(ToolError::transport(format!("worker '{}' {tool}: {text}", self.name)));
        }
        Ok(text)
    }

    pub async fn request(&self, method: &str, params: Value) -> ToolResult<Value> {
        self.request_within(method, params, self.timeout).await
    }

    async fn request_within(&self, method: &str, params: Value, limit: Duration) -> ToolResult<Value> {
        if !self.is_alive() {
            return Err(self.exited());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };
        // the router may have exited and cleared `pending` before the insert
        if !self.is_alive() {
            return Err(self.exited());
        }

        self.send(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await?;

        let response = timeout(limit, rx)
            .await
            .map_err(|_| {
                ToolError::transport(format!(
                    "worker '{}' timed out after {}s on {method}",
                    self.name,
                    limit.as_secs()
                ))
            })?
            .map_err(|_| self.exited())?;

        if let Some(err) = response.get("error") {
            let msg = err.get("message").and_then(|m| m.as_str()).unwrap_or("unknown");
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            return Err(ToolError::transport(format!(
                "worker '{}' error {code}: {msg}",
                self.name
            )));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| ToolError::transport(format!("worker '{}': response missing 'result'", self.name)))
    }

    async fn notify(&self, method: &str) -> ToolResult<()> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method })).await
    }

    async fn send(&self, msg: &Value) -> ToolResult<()> {
        let mut stdin = self.stdin.lock().await;
        write_message(&mut *stdin, msg, Framing::Line)
            .await
            .map_err(|e| ToolError::transport(format!("worker '{}' write: {e}", self.name)))
    }
}

/// The message inside a worker error, without the variant's prefix.
fn detail(e: ToolError) -> String {
    match e {
        ToolError::BridgeUnavailable(msg) | ToolError::Transport(msg) => msg,
        other => other.to_string(),
    }
}

async fn route_responses<R>(name: String, mut reader: R, pending: Pending, closed: Arc<AtomicBool>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_message(&mut reader).await {
            Ok(Some((msg, _))) => {
                let Some(id) = msg.get("id").and_then(|v| v.as_u64()) else {
                    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("unknown");
                    tracing::debug!(worker = %name, "skipping notification: {method}");
                    continue;
                };
                if msg.get("method").is_some() {
                    tracing::debug!(worker = %name, id, "ignoring request from worker");
                    continue;
                }
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => tracing::debug!(worker = %name, id, "response for abandoned request"),
                }
            }
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::warn!(worker = %name, "unreadable stdout: {e}");
            }
            Err(e) => {
                tracing::warn!(worker = %name, "stdout closed: {e}");
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every caller still waiting.
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
    tracing::warn!(worker = %name, "worker exited");
}

// === Tool server ===
// Serves the facade's tools over stdio so an agent runtime can call them.

/// Argument the server strips from `tools/call` to pick the cache session.
pub const SESSION_ARGUMENT: &str = "session_id";

pub async fn run_tool_server(facade: Arc<ToolFacade>, default_session: String) -> io::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let writer = Arc::new(AsyncMutex::new(tokio::io::stdout()));
    let mut in_flight = JoinSet::new();

    loop {
        let (msg, framing) = match read_message(&mut reader).await {
            Ok(Some(found)) => found,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": e.to_string() }
                });
                write_message(&mut *writer.lock().await, &response, Framing::Line).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let id = msg.get("id").cloned().filter(|v| !v.is_null());
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

        let Some(id) = id else {
            // notifications need no reply
            continue;
        };

        let response = match method {
            "initialize" => {
                let protocol = params
                    .get("protocolVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or(PROTOCOL_VERSION);
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": protocol,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "vaultbridge", "version": env!("CARGO_PKG_VERSION") }
                    }
                })
            }
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "tools": tool_definitions() }
            }),
            "tools/call" => {
                let facade = facade.clone();
                let writer = writer.clone();
                let default_session = default_session.clone();
                in_flight.spawn(async move {
                    // a panicking tool must still answer, or the client waits forever
                    let call_id = id.clone();
                    let call = tokio::spawn(async move {
                        call_response(&facade, &default_session, call_id, params).await
                    });
                    let response = match call.await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::error!("tools/call task failed: {e}");
                            internal_error(id)
                        }
                    };
                    let mut out = writer.lock().await;
                    if let Err(e) = write_message(&mut *out, &response, framing).await {
                        tracing::warn!("failed to write tools/call response: {e}");
                    }
                });
                continue;
            }
            "shutdown" => {
                while in_flight.join_next().await.is_some() {}
                let response = json!({ "jsonrpc": "2.0", "id": id, "result": null });
                write_message(&mut *writer.lock().await, &response, framing).await?;
                break;
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {method}") }
            }),
        };
        write_message(&mut *writer.lock().await, &response, framing).await?;
    }

    while in_flight.join_next().await.is_some() {}
    facade.end_session(&default_session);
    Ok(())
}

fn internal_error(id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": -32603, "message": "internal error while running tool" }
    })
}

async fn call_response(facade: &ToolFacade, default_session: &str, id: Value, params: Value) -> Value {
    let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let mut arguments = match params.get("arguments").cloned() {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => serde_json::Map::new(),
        Some(_) => {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32602, "message": "arguments must be an object" }
            });
        }
    };
    let session = match arguments.remove(SESSION_ARGUMENT) {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        _ => default_session.to_string(),
    };

    let envelope = facade.execute_tool(&session, &name, Value::Object(arguments)).await;
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{ "type": "text", "text": envelope.to_value().to_string() }],
            "structuredContent": envelope.to_value(),
            "isError": !envelope.is_success()
        }
    })
}
