use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized description of one configured MCP server.
///
/// `command` and `args` are already lists here; the string-or-list union
/// accepted by the configuration document is resolved at parse time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub auto_start: bool,
}

impl ServerDescriptor {
    /// Full argv: the command prefix with the args appended.
    pub fn argv(&self) -> Vec<String> {
        self.command.iter().chain(self.args.iter()).cloned().collect()
    }
}

/// Lifecycle state of a configured server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Error,
}

/// Mutable status record kept alongside each descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerStatus {
    pub server_id: String,
    pub state: ServerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub tools_count: usize,
    pub resources_count: usize,
    pub prompts_count: usize,
}

impl ServerStatus {
    pub(crate) fn stopped(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            state: ServerState::Stopped,
            pid: None,
            started_at: None,
            last_error: None,
            tools_count: 0,
            resources_count: 0,
            prompts_count: 0,
        }
    }
}

/// Tool advertised by a server via `tools/list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    #[serde(default)]
    pub server_id: String,
}

/// Resource advertised by a server via `resources/list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub server_id: String,
}

/// Prompt advertised by a server via `prompts/list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub server_id: String,
}
