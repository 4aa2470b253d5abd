//! Loader for the `mcp_config.json` document.
//!
//! The document's top-level `mcpServers` object maps server ids to
//! descriptors. `command` and `args` each accept a single string or a list
//! of strings; both are normalized to lists here so the rest of the system
//! never sees the union. Unknown fields are ignored.

use std::{collections::BTreeMap, fs, path::Path};

use serde::Deserialize;
use tracing::warn;

use crate::{error::ConfigError, types::ServerDescriptor};

/// A string or a list of strings, as accepted for `command` and `args`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    One(String),
    Many(Vec<String>),
}

impl CommandSpec {
    fn into_vec(self) -> Vec<String> {
        match self {
            CommandSpec::One(value) => vec![value],
            CommandSpec::Many(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, RawServerEntry>,
}

#[derive(Debug, Deserialize)]
struct RawServerEntry {
    name: Option<String>,
    description: Option<String>,
    command: CommandSpec,
    args: Option<CommandSpec>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    auto_start: bool,
}

/// Read and normalize the configuration document.
///
/// An absent file is not an error: it yields an empty server set so the
/// gateway can come up before any servers are configured.
pub(crate) fn load(path: &Path) -> Result<BTreeMap<String, ServerDescriptor>, ConfigError> {
    if !path.exists() {
        warn!(path = %path.display(), "configuration file not found, starting with no servers");
        return Ok(BTreeMap::new());
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let document: ConfigDocument =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut servers = BTreeMap::new();
    for (id, raw) in document.mcp_servers {
        let command = raw.command.into_vec();
        if command.is_empty() || command.iter().all(|part| part.trim().is_empty()) {
            return Err(ConfigError::EmptyCommand { server: id });
        }

        let descriptor = ServerDescriptor {
            name: raw.name.unwrap_or_else(|| id.clone()),
            description: raw.description.unwrap_or_default(),
            command,
            args: raw.args.map(CommandSpec::into_vec).unwrap_or_default(),
            env: raw.env,
            auto_start: raw.auto_start,
            id: id.clone(),
        };
        servers.insert(id, descriptor);
    }

    Ok(servers)
}
