use std::{io, path::PathBuf, time::Duration};

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced while supervising MCP servers or dispatching requests.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("unknown server `{0}`")]
    UnknownServer(String),
    #[error("server `{0}` is not running")]
    NotRunning(String),
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server returned JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors surfaced while loading the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("server `{server}` has an empty command")]
    EmptyCommand { server: String },
}
