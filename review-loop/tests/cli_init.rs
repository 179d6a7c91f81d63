//! CLI tests for `review-loop init` and argument handling.
//!
//! Spawns the binary in a temp directory and checks exit codes and the JSON
//! response on stdout. Nothing here needs `git` or `gh`.

use std::fs;
use std::process::Command;

use review_loop::exit_codes;
use review_loop::io::config::{CONFIG_FILE_NAME, LoopConfig, load_config};
use serde_json::Value;

fn review_loop() -> Command {
    Command::new(env!("CARGO_BIN_EXE_review-loop"))
}

#[test]
fn init_writes_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = review_loop()
        .current_dir(temp.path())
        .args(["--repo", "acme/widgets", "init"])
        .output()
        .expect("review-loop init");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let response: Value = serde_json::from_slice(&output.stdout).expect("json response");
    assert_eq!(response["is_error"], Value::Bool(false));

    let cfg = load_config(&temp.path().join(CONFIG_FILE_NAME)).expect("load");
    assert_eq!(
        cfg,
        LoopConfig {
            repo: Some("acme/widgets".to_string()),
            ..LoopConfig::default()
        }
    );
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join(CONFIG_FILE_NAME);
    fs::write(&path, "persist_attempts = 7\n").expect("seed config");

    let output = review_loop()
        .current_dir(temp.path())
        .arg("init")
        .output()
        .expect("review-loop init");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let response: Value = serde_json::from_slice(&output.stdout).expect("json response");
    assert_eq!(response["is_error"], Value::Bool(true));
    assert!(
        response["text"]
            .as_str()
            .is_some_and(|text| text.contains("--force"))
    );
    assert_eq!(load_config(&path).expect("load").persist_attempts, 7);

    let status = review_loop()
        .current_dir(temp.path())
        .args(["init", "--force"])
        .status()
        .expect("review-loop init --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load"), LoopConfig::default());
}

#[test]
fn invalid_config_is_reported_before_any_platform_call() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(CONFIG_FILE_NAME), "read_attempts = 0\n").expect("seed config");

    let output = review_loop()
        .current_dir(temp.path())
        .arg("next")
        .output()
        .expect("review-loop next");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("read_attempts must be > 0"), "stderr: {stderr}");
}

#[test]
fn explicit_config_path_is_honoured() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("nested").join("loop.toml");
    let status = review_loop()
        .current_dir(temp.path())
        .args(["--config"])
        .arg(&path)
        .arg("init")
        .status()
        .expect("review-loop init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(path.exists());
}
