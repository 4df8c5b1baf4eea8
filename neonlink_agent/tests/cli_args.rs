//! CLI smoke tests for neonlink_agent.
use assert_cmd::prelude::*;
use std::process::Command;
use std::time::Duration;

#[test]
fn help_lists_flags() {
    let out = Command::cargo_bin("neonlink_agent")
        .expect("binary exists")
        .arg("--help")
        .output()
        .expect("run --help");
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for flag in ["--port", "--enableSSL", "--mock", "--allow-external", "--config"] {
        assert!(text.contains(flag), "help is missing {flag}");
    }
}

#[test]
fn port_short_and_long_are_accepted() {
    let tmp = tempfile::tempdir().expect("tempdir");
    for args in [["--port", "0"], ["-p", "0"]] {
        let mut child = Command::cargo_bin("neonlink_agent")
            .expect("binary exists")
            .env("XDG_CONFIG_HOME", tmp.path())
            .arg("--mock")
            .args(args)
            .spawn()
            .expect("spawn agent");
        std::thread::sleep(Duration::from_millis(300));
        // still running means the arguments parsed and the port bound
        assert!(child.try_wait().expect("poll child").is_none());
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[test]
fn missing_explicit_config_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("neonlink_agent")
        .expect("binary exists")
        .args(["--mock", "--config"])
        .arg(tmp.path().join("nope.json"))
        .assert()
        .failure();
}

#[test]
fn invalid_config_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("agent.json");
    std::fs::write(&path, r#"{"server":{"maxConnections":0}}"#).expect("write config");
    Command::cargo_bin("neonlink_agent")
        .expect("binary exists")
        .args(["--mock", "-p", "0", "--config"])
        .arg(&path)
        .assert()
        .failure();

    std::fs::write(&path, "{ not json").expect("write config");
    Command::cargo_bin("neonlink_agent")
        .expect("binary exists")
        .args(["--mock", "-p", "0", "--config"])
        .arg(&path)
        .assert()
        .failure();
}
