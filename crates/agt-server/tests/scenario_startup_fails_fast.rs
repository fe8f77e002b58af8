//! Fatal startup checks drive the real binary: misconfiguration and a held
//! writer lock must exit nonzero before the socket binds.

use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn workers_other_than_one_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("agt-server")
        .unwrap()
        .env_clear()
        .env("TELEMETRY_BASE_DIR", dir.path())
        .env("TELEMETRY_API_WORKERS", "4")
        .timeout(Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers must be 1"));
}

#[test]
fn held_writer_lock_exits_nonzero_with_distinguishable_error() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("db").join("telemetry.lock");

    // First "process": this test holds the lock.
    let _guard = agt_db::SingleWriterGuard::acquire(&lock_path).unwrap();

    Command::cargo_bin("agt-server")
        .unwrap()
        .env_clear()
        .env("TELEMETRY_BASE_DIR", dir.path())
        .timeout(Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("writer lock"));
}

#[test]
fn unparseable_port_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("agt-server")
        .unwrap()
        .env_clear()
        .env("TELEMETRY_BASE_DIR", dir.path())
        .env("TELEMETRY_API_PORT", "not-a-port")
        .timeout(Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid port"));
}
