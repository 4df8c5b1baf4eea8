//! CLI arg parsing tests for the neonlink viewer.
use assert_cmd::prelude::*;
use std::process::Command;

fn neonlink() -> Command {
    Command::cargo_bin("neonlink").expect("binary exists")
}

#[test]
fn help_mentions_short_and_long_flags() {
    let out = neonlink().arg("--help").output().expect("run --help");
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for flag in ["--token", "-t", "--command", "-c", "--param", "-P", "--count", "--demo", "--heartbeat"] {
        assert!(text.contains(flag), "help text missing {flag}\n{text}");
    }
}

#[test]
fn param_needs_key_value() {
    neonlink()
        .args(["-c", "ping", "--param", "novalue"])
        .assert()
        .failure();
    // well-formed params parse; --help short-circuits before connecting
    neonlink()
        .args(["-c", "set_polling_interval", "-P", "intervalMs=500", "--help"])
        .assert()
        .success();
}

#[test]
fn rejects_non_websocket_url() {
    neonlink().arg("http://127.0.0.1:9876/ws").assert().failure();
}

#[test]
fn unreachable_agent_is_an_error() {
    // port 9 (discard) is closed on test machines
    neonlink()
        .args(["ws://127.0.0.1:9/ws", "-n", "1"])
        .assert()
        .failure();
}
