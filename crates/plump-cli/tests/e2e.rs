//! End-to-end tests for the plump CLI.
//!
//! The demo spawns the binary itself as a worker process, so these exercise
//! both ends of the RPC channel and the broadcast queue across a real
//! process boundary.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use assert_cmd::Command;
use predicates::prelude::*;

// =============================================================================
// Demo Command Tests
// =============================================================================

#[test]
fn test_demo_binary_serializer() {
    let output = Command::cargo_bin("plump")
        .unwrap()
        .args(["demo", "--events", "3"])
        .output()
        .expect("Failed to run plump");

    if !output.status.success() {
        eprintln!("stderr: {}", String::from_utf8_lossy(&output.stderr));
    }
    assert!(output.status.success(), "demo should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();

    assert_eq!(lines[0], "add(2, 3, 4) = 9");
    assert_eq!(lines[1], "Hello, plump!");
    assert_eq!(
        lines[2..5],
        [
            r#"{"event": "progress", "step": 1, "total": 3}"#,
            r#"{"event": "progress", "step": 2, "total": 3}"#,
            r#"{"event": "progress", "step": 3, "total": 3}"#,
        ]
    );
    assert_eq!(lines[5], "progress events: 3");
    assert!(
        lines[6].starts_with("worker error: Command 'fail' failed"),
        "unexpected error line: {}",
        lines[6]
    );
    assert!(lines[7].starts_with("worker exited:"), "{}", lines[7]);
}

#[test]
fn test_demo_json_serializer() {
    Command::cargo_bin("plump")
        .unwrap()
        .args(["--serializer", "json", "demo", "--events", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("add(2, 3, 4) = 9"))
        .stdout(predicate::str::contains(r#""step": 5, "total": 5"#))
        .stdout(predicate::str::contains("progress events: 5"));
}

#[test]
fn test_demo_without_events() {
    Command::cargo_bin("plump")
        .unwrap()
        .args(["demo", "--events", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("progress events: 0"))
        .stdout(predicate::str::contains("progress\"").not());
}

// =============================================================================
// Argument Handling Tests
// =============================================================================

#[test]
fn test_unknown_serializer_rejected() {
    Command::cargo_bin("plump")
        .unwrap()
        .args(["--serializer", "yaml", "demo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("yaml"));
}

#[test]
fn test_worker_exits_when_stdin_is_closed() {
    // End-of-stream on the RPC endpoint stops the worker cleanly.
    Command::cargo_bin("plump")
        .unwrap()
        .arg("worker")
        .write_stdin("")
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .success();
}
