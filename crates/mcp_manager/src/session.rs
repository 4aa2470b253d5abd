//! JSON-RPC 2.0 client session over a child's stdio pipes.
//!
//! Outgoing messages are one JSON object per line, funneled through a
//! writer task so concurrent callers interleave whole messages. The stdout
//! reader correlates replies with pending requests by id; method-bearing
//! objects without a matching id are server-initiated notifications and are
//! only logged. Stderr lines become `server_stderr` events.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use gateway_events::{Event, EventBus};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStderr, ChildStdin, ChildStdout},
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::{
    error::McpError,
    process::{self, ChildHandle, SpawnedChild},
};

pub(crate) type RequestId = u64;

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, McpError>>>>>;

/// Stderr noise markers that are suppressed rather than forwarded.
const STDERR_NOISE_MARKERS: &[&str] = &["DOSKEY"];

/// Sent to the manager when a session's child goes away on its own.
#[derive(Debug)]
pub(crate) struct ExitNotice {
    pub server_id: String,
    pub generation: u64,
}

/// Live client-side state for one running server.
pub(crate) struct RpcSession {
    server_id: String,
    generation: u64,
    writer: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    next_id: AtomicU64,
    child: ChildHandle,
    tasks: Vec<JoinHandle<()>>,
    request_timeout: Duration,
}

impl RpcSession {
    /// Spawn the child and wire up its reader, writer, and stderr tasks.
    pub(crate) fn spawn(
        server_id: &str,
        argv: &[String],
        env: &BTreeMap<String, String>,
        generation: u64,
        request_timeout: Duration,
        bus: EventBus,
        exit_tx: mpsc::UnboundedSender<ExitNotice>,
    ) -> Result<Self, McpError> {
        let SpawnedChild {
            handle,
            stdin,
            stdout,
            stderr,
        } = process::spawn(argv, env)?;

        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(writer_task(stdin, writer_rx));
        let reader_handle = tokio::spawn(reader_task(
            server_id.to_string(),
            generation,
            stdout,
            pending.clone(),
            exit_tx,
        ));
        let stderr_handle = tokio::spawn(stderr_task(server_id.to_string(), stderr, bus));

        Ok(Self {
            server_id: server_id.to_string(),
            generation,
            writer: writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            child: handle,
            tasks: vec![writer_handle, reader_handle, stderr_handle],
            request_timeout,
        })
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.child.pid()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Write a framed request and await the correlated reply.
    ///
    /// Returns the reply's `result` value; an `error` reply surfaces as
    /// [`McpError::Rpc`]. On timeout the pending slot is removed and any
    /// late reply is discarded by the reader.
    pub(crate) async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            message["params"] = params;
        }
        let serialized = serde_json::to_string(&message)?;

        let (tx, rx) = oneshot::channel();
        {
            self.pending.lock().await.insert(id, tx);
        }

        debug!(server_id = %self.server_id, method, id, "sending request");
        if self.writer.send(serialized).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::NotRunning(self.server_id.clone()));
        }

        match time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::NotRunning(self.server_id.clone())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(server_id = %self.server_id, method, id, "request timed out");
                Err(McpError::Timeout(self.request_timeout))
            }
        }
    }

    /// Write a framed notification: no id, no reply.
    pub(crate) async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        let mut message = json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            message["params"] = params;
        }
        let serialized = serde_json::to_string(&message)?;
        self.writer
            .send(serialized)
            .map_err(|_| McpError::NotRunning(self.server_id.clone()))
    }

    /// Terminate the child and fail anything still pending.
    pub(crate) async fn stop(&self) {
        self.child.stop().await;
        let mut guard = self.pending.lock().await;
        for (_, tx) in guard.drain() {
            let _ = tx.send(Err(McpError::NotRunning(self.server_id.clone())));
        }
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        for handle in &self.tasks {
            handle.abort();
        }
    }
}

async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = rx.recv().await {
        if stdin.write_all(message.as_bytes()).await.is_err() {
            break;
        }
        if stdin.write_all(b"\n").await.is_err() {
            break;
        }
        let _ = stdin.flush().await;
    }

    let _ = stdin.shutdown().await;
}

async fn reader_task(
    server_id: String,
    generation: u64,
    stdout: ChildStdout,
    pending: PendingRequests,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        match next_line_lossy(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(&line) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(server_id = %server_id, %err, "ignoring non-JSON line on stdout");
                        continue;
                    }
                };
                dispatch_inbound(&server_id, value, &pending).await;
            }
            Ok(None) => break,
            Err(err) => {
                warn!(server_id = %server_id, %err, "stdout read failed");
                break;
            }
        }
    }

    {
        let mut guard = pending.lock().await;
        for (_, tx) in guard.drain() {
            let _ = tx.send(Err(McpError::NotRunning(server_id.clone())));
        }
    }

    let _ = exit_tx.send(ExitNotice {
        server_id,
        generation,
    });
}

async fn dispatch_inbound(server_id: &str, value: Value, pending: &PendingRequests) {
    let id = value.get("id").and_then(parse_request_id);
    if let Some(id) = id {
        let sender = { pending.lock().await.remove(&id) };
        if let Some(tx) = sender {
            let _ = tx.send(decode_reply(value));
            return;
        }
    }

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        debug!(server_id, method, "server notification");
    } else if id.is_some() {
        debug!(server_id, ?id, "discarding late or unknown reply");
    } else {
        warn!(server_id, "malformed message from server");
    }
}

fn decode_reply(value: Value) -> Result<Value, McpError> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(McpError::Rpc {
            code,
            message,
            data: error.get("data").cloned(),
        });
    }

    match value.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(McpError::Transport("reply missing result and error".into())),
    }
}

fn parse_request_id(value: &Value) -> Option<RequestId> {
    if let Some(num) = value.as_u64() {
        return Some(num);
    }

    value.as_str().and_then(|s| s.parse::<RequestId>().ok())
}

async fn stderr_task(server_id: String, stderr: ChildStderr, bus: EventBus) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    while let Ok(Some(line)) = next_line_lossy(&mut reader, &mut buf).await {
        let line = line.trim();
        if line.is_empty() || STDERR_NOISE_MARKERS.iter().any(|m| line.contains(m)) {
            continue;
        }
        warn!(server_id = %server_id, "server stderr: {line}");
        bus.publish(Event::ServerStderr {
            server_id: server_id.clone(),
            message: line.to_string(),
        });
    }
}

/// Read one newline-terminated line, decoding as UTF-8 with replacement.
async fn next_line_lossy<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> io::Result<Option<String>> {
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(&b'\n') | Some(&b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}
