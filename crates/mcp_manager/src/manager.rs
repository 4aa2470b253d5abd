//! Top-level orchestrator owning descriptors, statuses, catalogs, and
//! sessions.
//!
//! All maps live behind one async mutex locked only for short critical
//! sections, never across an RPC await; callers receive cloned snapshots.
//! The manager is constructed once at application entry and shared as an
//! `Arc` by the HTTP handlers.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::Utc;
use gateway_events::{Event, EventBus};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, Mutex},
    time,
};
use tracing::{debug, info, warn};

use crate::{
    config,
    error::{ConfigError, McpError},
    session::{ExitNotice, RpcSession},
    types::{
        PromptDescriptor, ResourceDescriptor, ServerDescriptor, ServerState, ServerStatus,
        ToolDescriptor,
    },
};

/// MCP protocol revision sent during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// Client identity advertised in `initialize`.
pub const CLIENT_NAME: &str = "mcp-gateway";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default deadline for a correlated JSON-RPC reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause between stop and start during a restart.
const RESTART_QUIESCE: Duration = Duration::from_secs(1);

/// Snapshot summary returned by [`Manager::load_config`].
#[derive(Clone, Debug, Serialize)]
pub struct ConfigSummary {
    pub servers: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Default)]
struct ManagerState {
    descriptors: BTreeMap<String, ServerDescriptor>,
    statuses: BTreeMap<String, ServerStatus>,
    sessions: BTreeMap<String, Arc<RpcSession>>,
    tools: BTreeMap<String, Vec<ToolDescriptor>>,
    resources: BTreeMap<String, Vec<ResourceDescriptor>>,
    prompts: BTreeMap<String, Vec<PromptDescriptor>>,
    next_generation: u64,
}

/// Supervisor for every configured MCP server.
pub struct Manager {
    config_path: PathBuf,
    request_timeout: Duration,
    bus: EventBus,
    state: Mutex<ManagerState>,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
}

impl Manager {
    /// Construct a manager with the default request timeout.
    pub fn new(config_path: impl AsRef<Path>, bus: EventBus) -> Arc<Self> {
        Self::with_request_timeout(config_path, bus, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Construct a manager with an explicit per-request RPC deadline.
    pub fn with_request_timeout(
        config_path: impl AsRef<Path>,
        bus: EventBus,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            config_path: config_path.as_ref().to_path_buf(),
            request_timeout,
            bus,
            state: Mutex::new(ManagerState::default()),
            exit_tx,
        });
        tokio::spawn(exit_watch(Arc::downgrade(&manager), exit_rx));
        manager
    }

    /// Load (or reload) the configuration document.
    ///
    /// The replacement is whole-document: servers whose id disappeared are
    /// stopped, new ids appear `stopped`, retained ids keep their running
    /// sessions untouched. An invalid document leaves the previous set
    /// unchanged.
    pub async fn load_config(&self) -> Result<ConfigSummary, ConfigError> {
        let loaded = match config::load(&self.config_path) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(%err, "configuration load failed, previous state retained");
                self.bus.publish(Event::ConfigError {
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let mut stopped_sessions = Vec::new();
        let summary = {
            let mut state = self.state.lock().await;

            let removed: Vec<String> = state
                .descriptors
                .keys()
                .filter(|id| !loaded.contains_key(*id))
                .cloned()
                .collect();
            for id in &removed {
                if let Some(session) = state.sessions.remove(id) {
                    stopped_sessions.push((id.clone(), session));
                }
                state.descriptors.remove(id);
                state.statuses.remove(id);
                state.tools.remove(id);
                state.resources.remove(id);
                state.prompts.remove(id);
            }

            let mut added = Vec::new();
            for (id, descriptor) in loaded {
                if !state.descriptors.contains_key(&id) {
                    state
                        .statuses
                        .insert(id.clone(), ServerStatus::stopped(id.clone()));
                    added.push(id.clone());
                }
                state.descriptors.insert(id.clone(), descriptor);
            }

            ConfigSummary {
                servers: state.descriptors.keys().cloned().collect(),
                added,
                removed,
            }
        };

        for (id, session) in stopped_sessions {
            session.stop().await;
            self.bus.publish(Event::ServerStopped { server_id: id });
        }

        info!(servers = summary.servers.len(), "configuration applied");
        self.bus.publish(Event::ConfigLoaded {
            servers: summary.servers.clone(),
        });
        Ok(summary)
    }

    /// Snapshot of every configured server descriptor.
    pub async fn list_servers(&self) -> Vec<ServerDescriptor> {
        let state = self.state.lock().await;
        state.descriptors.values().cloned().collect()
    }

    /// Snapshot of every server status.
    pub async fn statuses(&self) -> Vec<ServerStatus> {
        let state = self.state.lock().await;
        state.statuses.values().cloned().collect()
    }

    /// Status snapshot for one server.
    pub async fn get_status(&self, id: &str) -> Result<ServerStatus, McpError> {
        let state = self.state.lock().await;
        state
            .statuses
            .get(id)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(id.to_string()))
    }

    /// Start a configured server. Idempotent: starting a live server is a
    /// successful no-op. Spawn and handshake failures return `Ok(false)`
    /// with the failure recorded in the status.
    pub async fn start_server(&self, id: &str) -> Result<bool, McpError> {
        let session = {
            let mut state = self.state.lock().await;
            let descriptor = state
                .descriptors
                .get(id)
                .cloned()
                .ok_or_else(|| McpError::UnknownServer(id.to_string()))?;

            if state.sessions.contains_key(id) {
                debug!(server_id = id, "server already running");
                return Ok(true);
            }

            set_state(&mut state, id, ServerState::Starting);
            clear_catalogs(&mut state, id);
            self.bus.publish(Event::ServerStarting {
                server_id: id.to_string(),
            });

            let generation = state.next_generation;
            state.next_generation += 1;

            match RpcSession::spawn(
                id,
                &descriptor.argv(),
                &descriptor.env,
                generation,
                self.request_timeout,
                self.bus.clone(),
                self.exit_tx.clone(),
            ) {
                Ok(session) => {
                    let session = Arc::new(session);
                    if let Some(status) = state.statuses.get_mut(id) {
                        status.state = ServerState::Running;
                        status.pid = session.pid();
                        status.started_at = Some(Utc::now());
                        status.last_error = None;
                    }
                    state.sessions.insert(id.to_string(), session.clone());
                    info!(server_id = id, pid = ?session.pid(), "server started");
                    self.bus.publish(Event::ServerStarted {
                        server_id: id.to_string(),
                        pid: session.pid(),
                    });
                    session
                }
                Err(err) => {
                    warn!(server_id = id, %err, "failed to start server");
                    if let Some(status) = state.statuses.get_mut(id) {
                        status.state = ServerState::Error;
                        status.last_error = Some(err.to_string());
                    }
                    self.bus.publish(Event::ServerError {
                        server_id: id.to_string(),
                        error: err.to_string(),
                    });
                    return Ok(false);
                }
            }
        };

        // Handshake runs without the lock; state stays `running` meanwhile.
        if let Err(err) = self.initialize_session(&session).await {
            warn!(server_id = id, %err, "initialization handshake failed");
            let was_current = {
                let mut state = self.state.lock().await;
                match state.sessions.get(id) {
                    Some(current) if Arc::ptr_eq(current, &session) => {
                        state.sessions.remove(id);
                        true
                    }
                    _ => false,
                }
            };
            // Tear the child down before the error state becomes observable.
            session.stop().await;
            if was_current {
                let mut state = self.state.lock().await;
                if let Some(status) = state.statuses.get_mut(id) {
                    status.state = ServerState::Error;
                    status.pid = None;
                    status.started_at = None;
                    status.last_error = Some(err.to_string());
                }
                self.bus.publish(Event::ServerInitError {
                    server_id: id.to_string(),
                    error: err.to_string(),
                });
            }
            return Ok(false);
        }

        info!(server_id = id, "server initialized");
        self.bus.publish(Event::ServerInitialized {
            server_id: id.to_string(),
        });

        self.load_capabilities(id, &session).await;
        Ok(true)
    }

    /// Stop a running server. Returns `false` when nothing was running.
    pub async fn stop_server(&self, id: &str) -> Result<bool, McpError> {
        let session = {
            let mut state = self.state.lock().await;
            let Some(session) = state.sessions.remove(id) else {
                debug!(server_id = id, "no running server to stop");
                return Ok(false);
            };
            session
        };

        session.stop().await;

        {
            let mut state = self.state.lock().await;
            // A concurrent start may already own the id again.
            if !state.sessions.contains_key(id) {
                set_state(&mut state, id, ServerState::Stopped);
                clear_catalogs(&mut state, id);
            }
        }

        info!(server_id = id, "server stopped");
        self.bus.publish(Event::ServerStopped {
            server_id: id.to_string(),
        });
        Ok(true)
    }

    /// Stop, quiesce for one second, then start again.
    pub async fn restart_server(&self, id: &str) -> Result<bool, McpError> {
        {
            let state = self.state.lock().await;
            if !state.descriptors.contains_key(id) {
                return Err(McpError::UnknownServer(id.to_string()));
            }
        }

        let _ = self.stop_server(id).await?;
        time::sleep(RESTART_QUIESCE).await;
        self.start_server(id).await
    }

    /// Invoke a tool on a running server and return the MCP `result`.
    pub async fn call_tool(
        &self,
        id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        let session = self.live_session(id).await?;
        let params = json!({ "name": tool_name, "arguments": arguments });

        match session.send_request("tools/call", Some(params)).await {
            Ok(result) => {
                self.bus.publish(Event::ToolExecuted {
                    server_id: id.to_string(),
                    tool_name: tool_name.to_string(),
                    arguments,
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(err) => {
                self.bus.publish(Event::ToolError {
                    server_id: id.to_string(),
                    tool_name: tool_name.to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Read a resource and return its first text content, if any.
    pub async fn read_resource(&self, id: &str, uri: &str) -> Result<String, McpError> {
        let session = self.live_session(id).await?;

        match session
            .send_request("resources/read", Some(json!({ "uri": uri })))
            .await
        {
            Ok(result) => {
                let content = result
                    .get("contents")
                    .and_then(Value::as_array)
                    .and_then(|contents| contents.first())
                    .and_then(|content| content.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.bus.publish(Event::ResourceRead {
                    server_id: id.to_string(),
                    uri: uri.to_string(),
                    length: content.len(),
                });
                Ok(content)
            }
            Err(err) => {
                self.bus.publish(Event::ResourceError {
                    server_id: id.to_string(),
                    uri: uri.to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Fetch a prompt and return the MCP `result`.
    pub async fn get_prompt(
        &self,
        id: &str,
        prompt_name: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        let session = self.live_session(id).await?;
        let params = json!({ "name": prompt_name, "arguments": arguments });

        match session.send_request("prompts/get", Some(params)).await {
            Ok(result) => {
                self.bus.publish(Event::PromptRetrieved {
                    server_id: id.to_string(),
                    prompt_name: prompt_name.to_string(),
                    arguments,
                });
                Ok(result)
            }
            Err(err) => {
                self.bus.publish(Event::PromptError {
                    server_id: id.to_string(),
                    prompt_name: prompt_name.to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Catalog snapshot of one server's tools.
    pub async fn list_tools(&self, id: &str) -> Result<Vec<ToolDescriptor>, McpError> {
        let state = self.state.lock().await;
        if !state.descriptors.contains_key(id) {
            return Err(McpError::UnknownServer(id.to_string()));
        }
        Ok(state.tools.get(id).cloned().unwrap_or_default())
    }

    /// Catalog snapshot of one server's resources.
    pub async fn list_resources(&self, id: &str) -> Result<Vec<ResourceDescriptor>, McpError> {
        let state = self.state.lock().await;
        if !state.descriptors.contains_key(id) {
            return Err(McpError::UnknownServer(id.to_string()));
        }
        Ok(state.resources.get(id).cloned().unwrap_or_default())
    }

    /// Catalog snapshot of one server's prompts.
    pub async fn list_prompts(&self, id: &str) -> Result<Vec<PromptDescriptor>, McpError> {
        let state = self.state.lock().await;
        if !state.descriptors.contains_key(id) {
            return Err(McpError::UnknownServer(id.to_string()));
        }
        Ok(state.prompts.get(id).cloned().unwrap_or_default())
    }

    /// Aggregated tool catalogs keyed by server id.
    pub async fn all_tools(&self) -> BTreeMap<String, Vec<ToolDescriptor>> {
        let state = self.state.lock().await;
        state.tools.clone()
    }

    /// Aggregated resource catalogs keyed by server id.
    pub async fn all_resources(&self) -> BTreeMap<String, Vec<ResourceDescriptor>> {
        let state = self.state.lock().await;
        state.resources.clone()
    }

    /// Aggregated prompt catalogs keyed by server id.
    pub async fn all_prompts(&self) -> BTreeMap<String, Vec<PromptDescriptor>> {
        let state = self.state.lock().await;
        state.prompts.clone()
    }

    /// Start every server marked `auto_start`, collecting failures instead
    /// of aborting. Returns the ids that came up.
    pub async fn auto_start(&self) -> Vec<String> {
        let ids: Vec<String> = {
            let state = self.state.lock().await;
            state
                .descriptors
                .values()
                .filter(|descriptor| descriptor.auto_start)
                .map(|descriptor| descriptor.id.clone())
                .collect()
        };

        let mut started = Vec::new();
        for id in ids {
            match self.start_server(&id).await {
                Ok(true) => started.push(id),
                Ok(false) => {}
                Err(err) => warn!(server_id = %id, %err, "auto-start failed"),
            }
        }
        started
    }

    /// Best-effort stop of every live server.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let state = self.state.lock().await;
            state.sessions.keys().cloned().collect()
        };
        for id in ids {
            let _ = self.stop_server(&id).await;
        }
    }

    async fn live_session(&self, id: &str) -> Result<Arc<RpcSession>, McpError> {
        let state = self.state.lock().await;
        if !state.descriptors.contains_key(id) {
            return Err(McpError::UnknownServer(id.to_string()));
        }
        state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| McpError::NotRunning(id.to_string()))
    }

    async fn initialize_session(&self, session: &RpcSession) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": true },
                "sampling": {},
            },
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": CLIENT_VERSION,
            },
        });
        session.send_request("initialize", Some(params)).await?;
        session
            .send_notification("notifications/initialized", None)
            .await?;
        Ok(())
    }

    /// Issue the three list requests independently; a failing list leaves
    /// its catalog empty without aborting the others.
    async fn load_capabilities(&self, id: &str, session: &Arc<RpcSession>) {
        let tools = match session.send_request("tools/list", None).await {
            Ok(result) => parse_entries::<ToolDescriptor>(&result, "tools", id),
            Err(err) => {
                warn!(server_id = id, %err, "tools/list failed");
                Vec::new()
            }
        };

        let mut resources = match session.send_request("resources/list", None).await {
            Ok(result) => parse_entries::<ResourceDescriptor>(&result, "resources", id),
            Err(err) => {
                warn!(server_id = id, %err, "resources/list failed");
                Vec::new()
            }
        };
        for resource in &mut resources {
            if resource.name.is_empty() {
                resource.name = resource.uri.clone();
            }
        }

        let prompts = match session.send_request("prompts/list", None).await {
            Ok(result) => parse_entries::<PromptDescriptor>(&result, "prompts", id),
            Err(err) => {
                warn!(server_id = id, %err, "prompts/list failed");
                Vec::new()
            }
        };

        let counts = (tools.len(), resources.len(), prompts.len());
        {
            let mut state = self.state.lock().await;
            // The server may have stopped or restarted while we were listing.
            let still_current = state
                .sessions
                .get(id)
                .map(|current| Arc::ptr_eq(current, session))
                .unwrap_or(false);
            if !still_current {
                debug!(server_id = id, "discarding capabilities for a stale session");
                return;
            }
            state.tools.insert(id.to_string(), tools);
            state.resources.insert(id.to_string(), resources);
            state.prompts.insert(id.to_string(), prompts);
            if let Some(status) = state.statuses.get_mut(id) {
                status.tools_count = counts.0;
                status.resources_count = counts.1;
                status.prompts_count = counts.2;
            }
        }

        info!(
            server_id = id,
            tools = counts.0,
            resources = counts.1,
            prompts = counts.2,
            "capabilities loaded"
        );
        self.bus.publish(Event::ServerCapabilitiesLoaded {
            server_id: id.to_string(),
            tools: counts.0,
            resources: counts.1,
            prompts: counts.2,
        });
    }

    /// Cleanup after a child that went away on its own: same transition as
    /// an explicit stop, emitted once.
    async fn handle_child_exit(&self, notice: ExitNotice) {
        let session = {
            let mut state = self.state.lock().await;
            let current = state
                .sessions
                .get(&notice.server_id)
                .map(|session| session.generation() == notice.generation)
                .unwrap_or(false);
            if !current {
                return;
            }
            state.sessions.remove(&notice.server_id)
        };

        let Some(session) = session else { return };
        warn!(server_id = %notice.server_id, "server exited unexpectedly");
        session.stop().await;

        {
            let mut state = self.state.lock().await;
            if !state.sessions.contains_key(&notice.server_id) {
                set_state(&mut state, &notice.server_id, ServerState::Stopped);
                clear_catalogs(&mut state, &notice.server_id);
            }
        }
        self.bus.publish(Event::ServerStopped {
            server_id: notice.server_id,
        });
    }
}

async fn exit_watch(manager: Weak<Manager>, mut exit_rx: mpsc::UnboundedReceiver<ExitNotice>) {
    while let Some(notice) = exit_rx.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.handle_child_exit(notice).await;
    }
}

fn set_state(state: &mut ManagerState, id: &str, new_state: ServerState) {
    if let Some(status) = state.statuses.get_mut(id) {
        status.state = new_state;
        if !matches!(new_state, ServerState::Running) {
            status.pid = None;
            status.started_at = None;
        }
    }
}

fn clear_catalogs(state: &mut ManagerState, id: &str) {
    state.tools.remove(id);
    state.resources.remove(id);
    state.prompts.remove(id);
    if let Some(status) = state.statuses.get_mut(id) {
        status.tools_count = 0;
        status.resources_count = 0;
        status.prompts_count = 0;
    }
}

fn parse_entries<T: serde::de::DeserializeOwned>(
    result: &Value,
    key: &str,
    server_id: &str,
) -> Vec<T> {
    let Some(items) = result.get(key).and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let mut object = item.clone();
            if let Some(map) = object.as_object_mut() {
                map.insert("server_id".into(), Value::String(server_id.to_string()));
            }
            match serde_json::from_value(object) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(server_id, key, %err, "skipping malformed catalog entry");
                    None
                }
            }
        })
        .collect()
}
