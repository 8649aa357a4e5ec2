//! `ingest` and `db` commands.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

use common::{record_default, Store};

fn playtrail(store: &Store) -> Command {
    let mut cmd = Command::cargo_bin("playtrail").unwrap();
    cmd.env("HOME", store.dir.path())
        .env_remove("PLAYTRAIL_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--database")
        .arg(&store.path);
    cmd
}

const EVENTS: &str = r#"{"event": "playbook_start", "path": "/srv/site.yml", "ansible_version": "2.9.1", "at": "2019-11-08T16:00:00Z"}
{"event": "file", "path": "/srv/site.yml", "content": "- hosts: all\n"}
{"event": "play_start", "name": "Configure", "at": "2019-11-08T16:00:01Z"}
{"event": "task_start", "name": "ping", "action": "ping", "path": "/srv/site.yml", "lineno": 3, "at": "2019-11-08T16:00:01Z"}

{"event": "result", "host": "web01", "status": "ok", "started": "2019-11-08T16:00:01Z", "ended": "2019-11-08T16:00:02Z"}
{"event": "result", "host": "web02", "status": "unreachable", "started": "2019-11-08T16:00:01Z", "ended": "2019-11-08T16:00:03Z"}
{"event": "task_end", "at": "2019-11-08T16:00:03Z"}
{"event": "play_end", "at": "2019-11-08T16:00:04Z"}
{"event": "record", "key": "ticket", "value": "OPS-12"}
{"event": "playbook_end", "at": "2019-11-08T16:00:05Z"}
"#;

#[test]
fn test_ingest_file() {
    let store = Store::new();
    let events = store.scratch("events.jsonl");
    std::fs::write(&events, EVENTS).unwrap();

    playtrail(&store)
        .arg("ingest")
        .arg(&events)
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded 10 events (1 playbooks, 2 results)"));

    let out = playtrail(&store)
        .args(["--format", "json", "host", "list"])
        .assert()
        .success();
    let hosts: Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    let hosts = hosts.as_array().unwrap();
    assert_eq!(hosts.len(), 2);
    assert!(hosts.iter().any(|h| h["name"] == "web02" && h["unreachable"] == 1));

    let out = playtrail(&store)
        .args(["--format", "json", "playbook", "list", "--complete"])
        .assert()
        .success();
    let playbooks: Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(playbooks[0]["duration_us"], 5_000_000);
}

#[test]
fn test_ingest_stdin() {
    let store = Store::new();
    playtrail(&store).args(["ingest", "-"]).write_stdin(EVENTS).assert().success();
    playtrail(&store)
        .args(["record", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OPS-12"));
}

#[test]
fn test_ingest_out_of_order_fails() {
    let store = Store::new();
    playtrail(&store)
        .args(["ingest", "-"])
        .write_stdin("{\"event\": \"play_start\", \"name\": \"x\", \"at\": \"2019-11-08T16:00:00Z\"}\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

#[test]
fn test_ingest_bad_json_fails() {
    let store = Store::new();
    playtrail(&store)
        .args(["ingest", "-"])
        .write_stdin("not json\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid event"));
}

#[test]
fn test_db_migrate_is_idempotent() {
    let store = Store::new();
    playtrail(&store)
        .args(["db", "migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema already at version 2"));
}

#[test]
fn test_db_backfill_on_populated_store() {
    let store = Store::new();
    record_default(&store);
    let out = playtrail(&store)
        .args(["--format", "json", "db", "backfill"])
        .assert()
        .success();
    let report: Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    let tables = report["tables"].as_array().unwrap();
    assert!(!tables.is_empty());
    // Rows recorded with durations are already filled in.
    assert!(tables.iter().all(|t| t["updated"] == 0));
}
