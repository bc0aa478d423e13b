//! CLI integration tests
//!
//! Every test points the binary at a temporary config and data directory
//! so nothing from the host leaks in.

mod common;

use assert_cmd::Command;
use common::TestEnv;
use predicates::prelude::*;
use std::fs;

fn chat_cmd(env: &TestEnv) -> Command {
    let mut cmd = Command::cargo_bin("persona-chat").unwrap();
    cmd.arg("--config")
        .arg(env.config())
        .env_remove("OPENROUTER_API_KEY")
        .env_remove("PERSONA_CHAT_API_KEY")
        .env_remove("PERSONA_CHAT_DATA_DIR")
        .env_remove("PERSONA_CHAT_CONFIG");
    cmd
}

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin("persona-chat").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("persona"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("conversation"));
}

#[test]
fn test_version_command() {
    let mut cmd = Command::cargo_bin("persona-chat").unwrap();
    cmd.arg("version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("persona-chat"))
        .stdout(predicate::str::contains("Build Information"));
}

#[test]
fn test_version_flag() {
    let mut cmd = Command::cargo_bin("persona-chat").unwrap();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("persona-chat"));
}

#[test]
fn test_unknown_subcommand_fails() {
    let mut cmd = Command::cargo_bin("persona-chat").unwrap();
    cmd.arg("dance");
    cmd.assert().failure();
}

#[test]
fn test_conversation_list_creates_first_conversation() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["conversation", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("新对话"))
        .stdout(predicate::str::contains("(0 messages)"));

    assert!(env.data_dir.join("conversations.json").exists());
}

#[test]
fn test_conversation_new_and_rename() {
    let env = TestEnv::new();
    let output = chat_cmd(&env)
        .args(["conversation", "new"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let id = stdout
        .trim()
        .strip_prefix("Created conversation ")
        .unwrap()
        .to_string();

    chat_cmd(&env)
        .args(["conversation", "rename", &id[..8], "Rust 学习"])
        .assert()
        .success();

    chat_cmd(&env)
        .args(["conversation", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rust 学习"));
}

#[test]
fn test_conversation_switch_unknown_id() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["conversation", "switch", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Conversation not found"));
}

#[test]
fn test_conversation_settings_shows_defaults() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["conversation", "settings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Direction:      默认"))
        .stdout(predicate::str::contains("吴军"));
}

#[test]
fn test_persona_list_defaults() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["persona", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("贾行家"))
        .stdout(predicate::str::contains("万维钢"))
        .stdout(predicate::str::contains("吴军"));
}

#[test]
fn test_persona_add_duplicate_rejected() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["persona", "add", "--name", "Alice", "--prompt", "friendly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added persona Alice"));

    chat_cmd(&env)
        .args(["persona", "add", "--name", "Alice", "--prompt", "again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_persona_update_changes_roster() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["persona", "update", "吴军", "--name", "老吴", "--prompt", "测试简介"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated persona 老吴"));

    chat_cmd(&env)
        .args(["persona", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("老吴"))
        .stdout(predicate::str::contains("测试简介"));

    chat_cmd(&env)
        .args(["persona", "update", "老吴", "--name", "万维钢"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    chat_cmd(&env)
        .args(["persona", "update", "Nobody", "--prompt", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Persona not found"));
}

#[test]
fn test_persona_remove_unknown() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["persona", "remove", "Nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Persona not found"));
}

#[test]
fn test_send_without_api_key_reports_system_message() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["send", "你好"])
        .assert()
        .success()
        .stdout(predicate::str::contains("API key is not set"));

    chat_cmd(&env)
        .args(["conversation", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("用户: 你好"))
        .stdout(predicate::str::contains("API key is not set"));
}

#[test]
fn test_send_direction_only_changes_direction() {
    let env = TestEnv::new();
    chat_cmd(&env).args(["send", "#通俗解释"]).assert().success();

    chat_cmd(&env)
        .args(["conversation", "settings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Direction:      通俗解释"));
}

#[test]
fn test_send_empty_message_fails() {
    let env = TestEnv::new();
    chat_cmd(&env)
        .args(["send", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Message is empty"));
}

#[test]
fn test_export_then_import() {
    let env = TestEnv::new();
    chat_cmd(&env).args(["conversation", "new"]).assert().success();

    let export_path = env.path("export.json");
    chat_cmd(&env)
        .args(["export", "-o", export_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported to"));

    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&export_path).unwrap()).unwrap();
    assert_eq!(exported["conversations"].as_array().unwrap().len(), 2);
    assert!(exported.get("activeConversationId").is_some());
    assert!(exported.get("exportedAt").is_some());
    assert!(exported.get("version").is_some());

    let fresh = TestEnv::new();
    chat_cmd(&fresh)
        .args(["import", export_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 conversations."));
}

#[test]
fn test_import_rejects_non_array() {
    let env = TestEnv::new();
    let bad = env.path("bad.json");
    fs::write(&bad, r#"{"conversations": {"id": "x"}}"#).unwrap();

    chat_cmd(&env)
        .args(["import", bad.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid import data"));
}

#[test]
fn test_missing_config_file_fails() {
    let mut cmd = Command::cargo_bin("persona-chat").unwrap();
    cmd.args(["--config", "/nonexistent/persona-chat.toml", "conversation", "list"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}
