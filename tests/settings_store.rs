//! Settings store behaviour on real files.

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use tempfile::tempdir;

use revit_mcp::config::{Settings, SettingsStore, DEFAULT_MCP_PORT, DEFAULT_MODEL};
use revit_mcp::error::{ConfigError, McpError};

#[test]
fn partial_save_keeps_other_keys() {
    let dir = tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("settings.json"));

    store
        .save(json!({ "api_key": "sk-ant-abcdef", "model": "claude-opus" }))
        .unwrap();
    let saved = store.save(json!({ "mcp_port": 8000 })).unwrap();

    assert_eq!(saved.mcp_port, 8000);
    assert_eq!(saved.api_key, "sk-ant-abcdef");
    assert_eq!(saved.model, "claude-opus");
    assert_eq!(store.load(), saved);
}

#[test]
fn file_holds_every_key() {
    let dir = tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("nested").join("settings.json"));
    store.save(json!({ "auto_start": false })).unwrap();

    let text = std::fs::read_to_string(store.path()).unwrap();
    let stored: Value = serde_json::from_str(&text).unwrap();
    for key in ["mcp_port", "revit_port", "api_key", "model", "auto_start", "log_level"] {
        assert!(stored.get(key).is_some(), "missing {key}");
    }
    assert_eq!(stored["auto_start"], false);
}

#[test]
fn corrupt_file_loads_defaults_and_is_repaired_by_save() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ this is not json").unwrap();
    let store = SettingsStore::new(&path);

    assert_eq!(store.load(), Settings::default());

    store.save(json!({ "model": "claude-haiku" })).unwrap();
    let reloaded = store.load();
    assert_eq!(reloaded.model, "claude-haiku");
    assert_eq!(reloaded.mcp_port, DEFAULT_MCP_PORT);
}

#[test]
fn malformed_values_fall_back_per_key() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{
            "mcp_port": "not a port",
            "revit_port": 7000,
            "model": "",
            "log_level": "LOUD",
            "auto_start_server": false,
            "theme": "dark"
        }"#,
    )
    .unwrap();

    let settings = SettingsStore::new(&path).load();
    assert_eq!(settings.mcp_port, DEFAULT_MCP_PORT);
    assert_eq!(settings.revit_port, 7000);
    assert_eq!(settings.model, DEFAULT_MODEL);
    assert_eq!(settings.log_level, "info");
    assert!(!settings.auto_start);
}

#[test]
fn invalid_update_leaves_file_untouched() {
    let dir = tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("settings.json"));
    store.save(json!({ "mcp_port": 8000 })).unwrap();
    let before = std::fs::read_to_string(store.path()).unwrap();

    for update in [
        json!({ "revit_port": 8000 }),
        json!({ "mcp_port": "eight thousand" }),
        json!({ "log_level": "verbose" }),
        json!({ "colour": "blue" }),
        json!(["mcp_port", 1]),
    ] {
        let err = store.save(update.clone()).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { .. }),
            "{update} gave {err:?}"
        );
        assert_eq!(McpError::from(err).kind(), "ConfigValidationError");
    }

    assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
}

#[test]
fn concurrent_saves_do_not_lose_updates() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SettingsStore::new(dir.path().join("settings.json")));

    let writers: Vec<_> = [
        json!({ "mcp_port": 8100 }),
        json!({ "revit_port": 8101 }),
        json!({ "api_key": "sk-ant-concurrent" }),
        json!({ "model": "claude-sonnet" }),
        json!({ "auto_start": false }),
        json!({ "log_level": "debug" }),
    ]
    .into_iter()
    .map(|update| {
        let store = Arc::clone(&store);
        thread::spawn(move || store.save(update).unwrap())
    })
    .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let settings = store.load();
    assert_eq!(settings.mcp_port, 8100);
    assert_eq!(settings.revit_port, 8101);
    assert_eq!(settings.api_key, "sk-ant-concurrent");
    assert_eq!(settings.model, "claude-sonnet");
    assert!(!settings.auto_start);
    assert_eq!(settings.log_level, "debug");
}
