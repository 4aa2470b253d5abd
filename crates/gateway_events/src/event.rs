use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything the gateway reports about itself, as a closed set of variants.
///
/// Serialization matches the SSE wire shape: the variant name becomes the
/// `type` field and the payload becomes the `data` object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    ConfigLoaded {
        servers: Vec<String>,
    },
    ConfigError {
        error: String,
    },
    ServerStarting {
        server_id: String,
    },
    ServerStarted {
        server_id: String,
        pid: Option<u32>,
    },
    ServerStopped {
        server_id: String,
    },
    ServerError {
        server_id: String,
        error: String,
    },
    ServerInitError {
        server_id: String,
        error: String,
    },
    ServerInitialized {
        server_id: String,
    },
    ServerCapabilitiesLoaded {
        server_id: String,
        tools: usize,
        resources: usize,
        prompts: usize,
    },
    ServerStderr {
        server_id: String,
        message: String,
    },
    ToolExecuted {
        server_id: String,
        tool_name: String,
        arguments: Value,
        result: Value,
    },
    ToolError {
        server_id: String,
        tool_name: String,
        error: String,
    },
    ResourceRead {
        server_id: String,
        uri: String,
        length: usize,
    },
    ResourceError {
        server_id: String,
        uri: String,
        error: String,
    },
    PromptRetrieved {
        server_id: String,
        prompt_name: String,
        arguments: Value,
    },
    PromptError {
        server_id: String,
        prompt_name: String,
        error: String,
    },
    Heartbeat {},
}

impl Event {
    /// Wire name of the variant, as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ConfigLoaded { .. } => "config_loaded",
            Event::ConfigError { .. } => "config_error",
            Event::ServerStarting { .. } => "server_starting",
            Event::ServerStarted { .. } => "server_started",
            Event::ServerStopped { .. } => "server_stopped",
            Event::ServerError { .. } => "server_error",
            Event::ServerInitError { .. } => "server_init_error",
            Event::ServerInitialized { .. } => "server_initialized",
            Event::ServerCapabilitiesLoaded { .. } => "server_capabilities_loaded",
            Event::ServerStderr { .. } => "server_stderr",
            Event::ToolExecuted { .. } => "tool_executed",
            Event::ToolError { .. } => "tool_error",
            Event::ResourceRead { .. } => "resource_read",
            Event::ResourceError { .. } => "resource_error",
            Event::PromptRetrieved { .. } => "prompt_retrieved",
            Event::PromptError { .. } => "prompt_error",
            Event::Heartbeat {} => "heartbeat",
        }
    }
}

/// An [`Event`] stamped with its publication time.
///
/// Serializes to `{ "timestamp": "<ISO-8601>", "type": "...", "data": {...} }`,
/// the exact record the SSE adapter writes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    /// Stamp an event with the current wall-clock time.
    pub fn now(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
