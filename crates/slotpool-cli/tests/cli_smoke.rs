use std::net::TcpListener;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn slotpool() -> Command {
    let mut cmd = Command::cargo_bin("slotpool").unwrap();
    for var in [
        "SLOTPOOL_HOST",
        "SLOTPOOL_USER",
        "SLOTPOOL_PASSWORD",
        "SLOTPOOL_DATABASE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn unused_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap()
}

#[test]
fn help_lists_worker_flags() {
    slotpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--stagger-ms"))
        .stdout(predicate::str::contains("--audit-path"));
}

#[test]
fn zero_size_pool_exits_with_failure() {
    slotpool()
        .args(["--size", "0", "--workers", "0"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("pool size must be at least 1"));
}

#[test]
fn oversized_host_exits_with_failure() {
    let host = "h".repeat(200);
    slotpool()
        .args(["--host", host.as_str(), "--workers", "0"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Failed to create connection pool"));
}

#[test]
fn exits_cleanly_after_console_read() {
    let dir = tempdir().unwrap();
    let audit = dir.path().join("audit.csv");

    slotpool()
        .args(["--workers", "0", "--audit-path"])
        .arg(&audit)
        .write_stdin("\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Press any key to exit..."));

    assert!(!audit.exists());
}

#[test]
fn worker_audits_and_logs_failed_connect() {
    let dir = tempdir().unwrap();
    let audit = dir.path().join("audit.csv");
    let port = unused_port().to_string();

    slotpool()
        .args([
            "--host",
            "127.0.0.1",
            "--port",
            port.as_str(),
            "--connect-timeout-secs",
            "1",
            "--workers",
            "1",
            // Leaves the first dispatch, bounded by the 1 s connect
            // timeout, time to finish before stdin closes
            "--stagger-ms",
            "1500",
            "--audit-path",
        ])
        .arg(&audit)
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("connect failed"));

    let contents = std::fs::read_to_string(&audit).unwrap();
    let line = contents.lines().next().unwrap();
    let pattern =
        predicate::str::is_match(r#"^"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}", "", "2000"$"#).unwrap();
    assert!(pattern.eval(line), "unexpected audit line: {line}");
}
