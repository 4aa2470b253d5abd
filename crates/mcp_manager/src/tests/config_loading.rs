use std::fs;

use serde_json::json;

use crate::test_support::*;
use crate::{config, ConfigError};

#[tokio::test]
async fn string_and_list_forms_normalize_to_lists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mcp_config.json");
    let document = json!({
        "mcpServers": {
            "strings": { "command": "echo-mcp", "args": "--verbose" },
            "lists": { "command": ["python3", "server.py"], "args": ["--port", "0"] },
            "bare": { "command": "echo-mcp" },
        }
    });
    fs::write(&path, document.to_string()).expect("write config");

    let servers = config::load(&path).expect("load");
    assert_eq!(servers.len(), 3);

    let strings = &servers["strings"];
    assert_eq!(strings.command, vec!["echo-mcp"]);
    assert_eq!(strings.args, vec!["--verbose"]);
    assert_eq!(strings.argv(), vec!["echo-mcp", "--verbose"]);

    let lists = &servers["lists"];
    assert_eq!(lists.command, vec!["python3", "server.py"]);
    assert_eq!(lists.args, vec!["--port", "0"]);

    let bare = &servers["bare"];
    assert!(bare.args.is_empty());
    assert_eq!(bare.argv(), vec!["echo-mcp"]);
}

#[tokio::test]
async fn optional_fields_take_documented_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mcp_config.json");
    let document = json!({
        "mcpServers": {
            "minimal": { "command": "echo-mcp" },
            "full": {
                "name": "Demo",
                "description": "a demo server",
                "command": "echo-mcp",
                "env": { "API_KEY": "k" },
                "auto_start": true,
                "not_a_real_field": 42,
            },
        }
    });
    fs::write(&path, document.to_string()).expect("write config");

    let servers = config::load(&path).expect("load");

    let minimal = &servers["minimal"];
    assert_eq!(minimal.name, "minimal");
    assert_eq!(minimal.description, "");
    assert!(minimal.env.is_empty());
    assert!(!minimal.auto_start);

    let full = &servers["full"];
    assert_eq!(full.name, "Demo");
    assert_eq!(full.description, "a demo server");
    assert_eq!(full.env.get("API_KEY").map(String::as_str), Some("k"));
    assert!(full.auto_start);
}

#[tokio::test]
async fn missing_file_yields_empty_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let servers = config::load(&dir.path().join("nope.json")).expect("load");
    assert!(servers.is_empty());
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mcp_config.json");
    let document = json!({ "mcpServers": { "broken": { "command": [] } } });
    fs::write(&path, document.to_string()).expect("write config");

    let err = config::load(&path).expect_err("empty command must fail");
    assert!(matches!(err, ConfigError::EmptyCommand { server } if server == "broken"));
}

#[tokio::test]
async fn invalid_json_retains_previous_state() {
    let mut harness = Harness::new(|script| {
        json!({ "demo": stub_entry(script, "happy", false) })
    });

    harness.manager.load_config().await.expect("initial load");
    assert_eq!(
        next_event(&mut harness.events).await.event.kind(),
        "config_loaded"
    );

    harness.rewrite_config_raw("{ not json");
    let err = harness.manager.load_config().await.expect_err("invalid json");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert_eq!(
        next_event(&mut harness.events).await.event.kind(),
        "config_error"
    );

    let servers = harness.manager.list_servers().await;
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, "demo");
}

#[tokio::test]
async fn identical_reload_leaves_descriptors_equal() {
    let harness = Harness::new(|script| {
        json!({ "demo": stub_entry(script, "happy", false) })
    });

    harness.manager.load_config().await.expect("initial load");
    let before = harness.manager.list_servers().await;

    harness.manager.load_config().await.expect("reload");
    let after = harness.manager.list_servers().await;

    assert_eq!(before, after);
}

#[tokio::test]
async fn descriptor_and_status_key_sets_stay_equal() {
    let harness = Harness::new(|script| {
        json!({
            "a": stub_entry(script, "happy", false),
            "b": stub_entry(script, "happy", false),
        })
    });

    harness.manager.load_config().await.expect("load");

    let descriptor_ids: Vec<String> = harness
        .manager
        .list_servers()
        .await
        .into_iter()
        .map(|d| d.id)
        .collect();
    let status_ids: Vec<String> = harness
        .manager
        .statuses()
        .await
        .into_iter()
        .map(|s| s.server_id)
        .collect();
    assert_eq!(descriptor_ids, status_ids);
}
