use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use gateway_events::{EventEnvelope, EventReceiver};
use serde_json::{json, Value};
use tokio::time;

use crate::Manager;

/// Per-request deadline used by the tests; short enough that the timeout
/// scenarios finish quickly, long enough for a Python stub to answer.
pub(crate) const TEST_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

const EVENT_WAIT: Duration = Duration::from_secs(10);

/// A stub MCP server whose behavior is selected by its first argument:
///
/// - `happy` — answers everything; one `echo` tool.
/// - `mute` — never replies to anything (handshake failure).
/// - `silent_tools` — never replies to `tools/list`.
/// - `slow_tools` — replies to `tools/list` after three seconds (late).
/// - `no_prompts` — returns a JSON-RPC error for `prompts/list`.
/// - `error_on_call` — returns a JSON-RPC error for `tools/call`.
/// - `crash_on_call` — exits as soon as `tools/call` arrives.
pub(crate) fn write_stub_server(dir: &Path) -> PathBuf {
    let script_path = dir.join("stub-mcp-server");
    let script = r#"#!/usr/bin/env python3
import json
import sys
import time

mode = sys.argv[1] if len(sys.argv) > 1 else "happy"

def send(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    if not line.strip():
        continue
    msg = json.loads(line)
    method = msg.get("method")
    req_id = msg.get("id")
    if method == "initialize":
        if mode == "mute":
            continue
        send({"jsonrpc": "2.0", "id": req_id, "result": {"protocolVersion": "2024-11-05", "capabilities": {}}})
    elif method == "notifications/initialized":
        continue
    elif method == "tools/list":
        if mode == "silent_tools":
            continue
        if mode == "slow_tools":
            time.sleep(3)
        send({"jsonrpc": "2.0", "id": req_id, "result": {"tools": [{"name": "echo", "description": "", "inputSchema": {}}]}})
    elif method == "resources/list":
        send({"jsonrpc": "2.0", "id": req_id, "result": {"resources": []}})
    elif method == "prompts/list":
        if mode == "no_prompts":
            send({"jsonrpc": "2.0", "id": req_id, "error": {"code": -32601, "message": "prompts not supported"}})
        else:
            send({"jsonrpc": "2.0", "id": req_id, "result": {"prompts": []}})
    elif method == "tools/call":
        if mode == "crash_on_call":
            sys.exit(1)
        if mode == "error_on_call":
            send({"jsonrpc": "2.0", "id": req_id, "error": {"code": -32000, "message": "tool exploded"}})
            continue
        args = msg.get("params", {}).get("arguments", {})
        send({"jsonrpc": "2.0", "id": req_id, "result": {"content": [{"type": "text", "text": args.get("msg", "")}]}})
    elif method == "resources/read":
        uri = msg.get("params", {}).get("uri", "")
        send({"jsonrpc": "2.0", "id": req_id, "result": {"contents": [{"uri": uri, "mimeType": "text/plain", "text": "resource body"}]}})
    elif method == "prompts/get":
        send({"jsonrpc": "2.0", "id": req_id, "result": {"description": "", "messages": []}})
"#;

    fs::write(&script_path, script).expect("write script");
    let mut perms = fs::metadata(&script_path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).expect("chmod");
    script_path
}

/// Config entry for a stub server in the given mode.
pub(crate) fn stub_entry(script: &Path, mode: &str, auto_start: bool) -> Value {
    json!({
        "command": script.to_string_lossy(),
        "args": [mode],
        "auto_start": auto_start,
    })
}

pub(crate) struct Harness {
    _dir: tempfile::TempDir,
    pub script: PathBuf,
    pub config_path: PathBuf,
    pub manager: Arc<Manager>,
    pub events: EventReceiver,
}

impl Harness {
    /// Write `mcp_config.json` with the given `mcpServers` object and build
    /// a manager around it. The configuration is not loaded yet.
    pub(crate) fn new(servers: impl FnOnce(&Path) -> Value) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_stub_server(dir.path());
        let config_path = dir.path().join("mcp_config.json");
        let document = json!({ "mcpServers": servers(&script) });
        fs::write(&config_path, document.to_string()).expect("write config");

        let (bus, events) = gateway_events::bounded(gateway_events::DEFAULT_CAPACITY);
        let manager = Manager::with_request_timeout(&config_path, bus, TEST_REQUEST_TIMEOUT);

        Self {
            _dir: dir,
            script,
            config_path,
            manager,
            events,
        }
    }

    /// Overwrite the config document on disk (for reload scenarios).
    pub(crate) fn rewrite_config(&self, servers: Value) {
        let document = json!({ "mcpServers": servers });
        fs::write(&self.config_path, document.to_string()).expect("rewrite config");
    }

    /// Overwrite the config document with raw bytes (for invalid-JSON
    /// scenarios).
    pub(crate) fn rewrite_config_raw(&self, contents: &str) {
        fs::write(&self.config_path, contents).expect("rewrite config");
    }
}

/// Next event, ignoring stderr chatter.
pub(crate) async fn next_event(events: &mut EventReceiver) -> EventEnvelope {
    loop {
        let envelope = time::timeout(EVENT_WAIT, events.recv())
            .await
            .expect("event timeout")
            .expect("event bus closed");
        if envelope.event.kind() != "server_stderr" {
            return envelope;
        }
    }
}

/// Skip events until one of the given kind arrives.
pub(crate) async fn wait_for_kind(events: &mut EventReceiver, kind: &str) -> EventEnvelope {
    loop {
        let envelope = next_event(events).await;
        if envelope.event.kind() == kind {
            return envelope;
        }
    }
}

/// Collect event kinds (stderr excluded) until the given kind arrives,
/// inclusive.
pub(crate) async fn kinds_until(events: &mut EventReceiver, last: &str) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    loop {
        let envelope = next_event(events).await;
        kinds.push(envelope.event.kind());
        if envelope.event.kind() == last {
            return kinds;
        }
    }
}
