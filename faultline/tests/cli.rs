//! End-to-end runs of the scenario host.

use std::process::{Command, Output};

fn run(args: &[&str]) -> (Output, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_faultline"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("execute faultline");
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    (output, text)
}

#[test]
fn invalid_config_is_logged_before_exit() {
    let dir = tempfile::TempDir::new().unwrap();
    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[shared]\nservice_name = \"\"\n").unwrap();

    let (output, text) = run(&["--config", bad.to_str().unwrap(), "managed"]);
    assert_eq!(output.status.code(), Some(1), "{text}");
    assert!(text.contains("faultline failed"), "{text}");
}

#[test]
fn missing_config_is_logged_before_exit() {
    let dir = tempfile::TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let (output, text) = run(&["--config", missing.to_str().unwrap(), "managed"]);
    assert_eq!(output.status.code(), Some(1), "{text}");
    assert!(text.contains("faultline failed"), "{text}");
}

#[test]
fn native_faults_are_handled_with_the_default_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("empty.toml");
    std::fs::write(&config, "").unwrap();

    let (output, text) = run(&[
        "--config",
        config.to_str().unwrap(),
        "native-divide",
        "native-crash",
        "native-jump",
        "managed",
    ]);
    assert!(output.status.success(), "{text}");
    assert_eq!(text.matches("[native_corrupted_state] handled (recoverable)").count(), 3, "{text}");
    assert!(text.contains("call stack (best effort):"), "{text}");
    assert!(text.contains("[ui_thread_dispatch] handled (recoverable)"), "{text}");
    assert!(text.contains("faultline shutdown complete"), "{text}");
}

#[test]
fn native_fault_without_the_relay_ends_the_process() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("empty.toml");
    std::fs::write(&config, "").unwrap();

    let (output, text) = run(&["--config", config.to_str().unwrap(), "--no-relay", "native-divide"]);
    assert!(!output.status.success(), "{text}");
    assert!(!text.contains("[native_corrupted_state]"), "{text}");
}
