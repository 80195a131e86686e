use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const ENV_KEYS: [&str; 5] = [
    "TELEGRAM_BOT_TOKEN",
    "CHATGPT_ACCESS_TOKEN",
    "CHATGPT_BASE_URL",
    "CHATGPT_MODEL",
    "CHATGPT_PROXY",
];

fn gptrelay(config_dir: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_gptrelay"));
    command
        .arg("--config-dir")
        .arg(config_dir)
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    for key in ENV_KEYS {
        command.env_remove(key);
    }
    command.output().expect("Failed to run gptrelay")
}

fn write_config(dir: &Path, sessions_path: &Path) {
    let config = json!({
        "telegram": { "bot_token": "123:abc" },
        "sessions": { "path": sessions_path.to_string_lossy() }
    });
    std::fs::write(dir.join("config.json"), config.to_string()).unwrap();
}

#[test]
fn test_status_without_config() {
    let dir = TempDir::new().unwrap();
    let output = gptrelay(dir.path(), &["status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("gptrelay Status"));
    assert!(stdout.contains("Bot token: <unset>"));
    assert!(stdout.contains("Not ready"));
}

#[test]
fn test_status_masks_tokens() {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), &dir.path().join("sessions.json"));
    let output = gptrelay(dir.path(), &["status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("Bot token: ********:abc"));
    assert!(!stdout.contains("123:abc"));
}

#[test]
fn test_sessions_list_and_clear() {
    let dir = TempDir::new().unwrap();
    let sessions_path = dir.path().join("sessions.json");
    write_config(dir.path(), &sessions_path);
    let sessions = json!({
        "version": 1,
        "sessions": {
            "telegram:42": { "conversation_id": "c1", "parent_id": "p1", "state": "chatting" },
            "telegram:7": { "state": "chatting" }
        }
    });
    std::fs::write(&sessions_path, sessions.to_string()).unwrap();

    let output = gptrelay(dir.path(), &["sessions"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("telegram:42"));
    assert!(stdout.contains("conversation=c1 parent=p1"));
    assert!(stdout.contains("telegram:7"));

    let output = gptrelay(dir.path(), &["sessions", "--clear", "telegram:42"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Session reset"));

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&sessions_path).unwrap()).unwrap();
    assert!(saved["sessions"].get("telegram:42").is_none());
    assert!(saved["sessions"].get("telegram:7").is_some());

    let output = gptrelay(dir.path(), &["sessions", "--clear", "telegram:42"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("No session stored"));
}

#[test]
fn test_corrupt_session_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let sessions_path = dir.path().join("sessions.json");
    write_config(dir.path(), &sessions_path);
    std::fs::write(&sessions_path, "{not json").unwrap();

    let output = gptrelay(dir.path(), &["sessions"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load sessions"));
}

#[test]
fn test_ask_requires_access_token() {
    let dir = TempDir::new().unwrap();
    let output = gptrelay(dir.path(), &["ask", "--message", "hello"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("chatgpt.access_token"));
}

#[test]
fn test_gateway_refuses_incomplete_config() {
    let dir = TempDir::new().unwrap();
    let output = gptrelay(dir.path(), &["gateway"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("access_token"));
}
