use std::process::Command;

use crate::init_test_logging;

#[test]
fn test_itrd_help_includes_usage() {
    init_test_logging();
    crate::test_log!("TEST START: test_itrd_help_includes_usage");

    let output = Command::new(env!("CARGO_BIN_EXE_itrd"))
        .arg("--help")
        .output()
        .expect("Failed to run itrd --help");

    assert!(output.status.success(), "itrd --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("--config") && stdout.contains("--check-config"),
        "Expected help output to list config flags, got: {stdout}"
    );

    crate::test_log!("TEST PASS: test_itrd_help_includes_usage");
}

#[test]
fn test_itrd_version() {
    init_test_logging();

    let output = Command::new(env!("CARGO_BIN_EXE_itrd"))
        .arg("--version")
        .output()
        .expect("Failed to run itrd --version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "got: {stdout}");
}

#[test]
fn test_check_config_accepts_valid_file() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("itr.toml");
    std::fs::write(
        &path,
        "[run]\npoll_interval_secs = 30\n\n[metrics]\nurl = \"http://influx:8086\"\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_itrd"))
        .arg("--config")
        .arg(&path)
        .arg("--check-config")
        .env_remove("ITR_POLL_INTERVAL_SECS")
        .output()
        .expect("Failed to run itrd --check-config");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Configuration OK"));
}

#[test]
fn test_check_config_rejects_invalid_policy() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("itr.toml");
    std::fs::write(&path, "[run]\nsuccess_after_polls = 10\nstall_after_polls = 5\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_itrd"))
        .arg("--config")
        .arg(&path)
        .arg("--check-config")
        .output()
        .expect("Failed to run itrd --check-config");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("stall_after_polls"), "stderr: {stderr}");
}

#[test]
fn test_invalid_env_override_is_reported() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_itrd"))
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("--check-config")
        .env("ITR_POLL_INTERVAL_SECS", "forever")
        .output()
        .expect("Failed to run itrd --check-config");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("POLL_INTERVAL_SECS"), "stderr: {stderr}");
}
