//! Binary-level tests of the list/show/delete commands.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

use common::{count, record_default, record_run, RunOptions, Store};
use playtrail::model::ResultStatus;

fn playtrail(store: &Store) -> Command {
    let mut cmd = Command::cargo_bin("playtrail").unwrap();
    cmd.env("HOME", store.dir.path())
        .env_remove("PLAYTRAIL_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--database")
        .arg(&store.path);
    cmd
}

fn json(store: &Store, args: &[&str]) -> Value {
    let out = playtrail(store).args(["--format", "json"]).args(args).assert().success();
    serde_json::from_slice(&out.get_output().stdout).unwrap()
}

fn ids(value: &Value) -> Vec<i64> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_i64().unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// record
// ---------------------------------------------------------------------------

#[test]
fn test_record_list_and_show() {
    let store = Store::new();
    let run = record_default(&store);

    let records = json(&store, &["record", "list"]);
    assert_eq!(ids(&records), vec![run.record]);

    let by_id = json(&store, &["record", "show", run.record.to_string().as_str()]);
    assert_eq!(by_id["key"], "build");
    assert_eq!(by_id["type"], "text");

    let by_key = json(&store, &["record", "show", "--playbook", run.playbook.to_string().as_str(), "build"]);
    assert_eq!(by_key["id"].as_i64(), Some(run.record));
}

#[test]
fn test_record_show_missing_fails() {
    let store = Store::new();
    record_default(&store);
    playtrail(&store)
        .args(["record", "show", "9999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("record not found"));
    playtrail(&store)
        .args(["record", "show", "--playbook", "1", "nope"])
        .assert()
        .failure();
}

#[test]
fn test_record_list_for_unknown_playbook_is_empty() {
    let store = Store::new();
    record_default(&store);
    let records = json(&store, &["record", "list", "--playbook", "9999"]);
    assert!(records.as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// host
// ---------------------------------------------------------------------------

#[test]
fn test_host_list_defaults_to_latest_playbook() {
    let store = Store::new();
    record_default(&store);
    let second = record_run(
        &store,
        RunOptions {
            host: "web01",
            offset: chrono::Duration::minutes(5),
            ..Default::default()
        },
    );

    let latest = json(&store, &["host", "list"]);
    assert_eq!(ids(&latest), vec![second.host]);

    let all = json(&store, &["host", "list", "--all"]);
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[test]
fn test_host_show_by_id_and_name() {
    let store = Store::new();
    let run = record_default(&store);

    let host = json(&store, &["host", "show", run.host.to_string().as_str()]);
    assert_eq!(host["name"], "localhost");
    assert_eq!(host["ok"], 1);

    playtrail(&store)
        .args(["host", "show", "-b", run.playbook.to_string().as_str(), "localhost"])
        .assert()
        .success()
        .stdout(predicate::str::contains("localhost"));

    playtrail(&store).args(["host", "show", "9999"]).assert().failure();
}

// ---------------------------------------------------------------------------
// play / task
// ---------------------------------------------------------------------------

#[test]
fn test_play_list_and_show() {
    let store = Store::new();
    let run = record_default(&store);

    assert_eq!(ids(&json(&store, &["play", "list", "--all"])), vec![run.play]);
    assert!(json(&store, &["play", "list", "-b", "9999"]).as_array().unwrap().is_empty());

    playtrail(&store)
        .args(["play", "show", run.play.to_string().as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configure"));
    playtrail(&store).args(["play", "show", "9999"]).assert().failure();
}

#[test]
fn test_task_list_scopes_and_show() {
    let store = Store::new();
    let run = record_default(&store);

    assert_eq!(ids(&json(&store, &["task", "list"])), vec![run.task]);
    assert_eq!(ids(&json(&store, &["task", "list", "--play", run.play.to_string().as_str()])), vec![run.task]);
    assert!(json(&store, &["task", "list", "--play", "9999"]).as_array().unwrap().is_empty());

    let task = json(&store, &["task", "show", run.task.to_string().as_str()]);
    assert_eq!(task["action"], "command");
    assert_eq!(task["duration_us"], 2_000_000);
    playtrail(&store).args(["task", "show", "9999"]).assert().failure();
}

// ---------------------------------------------------------------------------
// playbook
// ---------------------------------------------------------------------------

#[test]
fn test_playbook_completion_filters() {
    let store = Store::new();
    let done = record_default(&store);
    let running = record_run(
        &store,
        RunOptions {
            completed: false,
            ..Default::default()
        },
    );

    assert_eq!(ids(&json(&store, &["playbook", "list"])).len(), 2);
    assert_eq!(ids(&json(&store, &["playbook", "list", "--complete"])), vec![done.playbook]);
    assert_eq!(ids(&json(&store, &["playbook", "list", "--incomplete"])), vec![running.playbook]);

    playtrail(&store)
        .args(["playbook", "list", "--complete", "--incomplete"])
        .assert()
        .code(2);
}

#[test]
fn test_playbook_incomplete_filter_on_complete_store_is_empty() {
    let store = Store::new();
    record_default(&store);
    assert!(json(&store, &["playbook", "list", "--incomplete"]).as_array().unwrap().is_empty());
}

#[test]
fn test_playbook_show() {
    let store = Store::new();
    let run = record_default(&store);
    let playbook = json(&store, &["playbook", "show", run.playbook.to_string().as_str()]);
    assert_eq!(playbook["path"], "/srv/playbooks/site.yml");
    assert_eq!(playbook["completed"], true);
    assert_eq!(playbook["duration_us"], 5_000_000);
    playtrail(&store).args(["playbook", "show", "9999"]).assert().failure();
}

#[test]
fn test_playbook_delete_cascades() {
    let store = Store::new();
    let doomed = record_default(&store);
    let kept = record_default(&store);

    playtrail(&store)
        .args(["playbook", "delete", doomed.playbook.to_string().as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));

    for table in ["playbooks", "plays", "tasks", "results", "hosts", "files", "records"] {
        assert_eq!(count(&store.pool, table, doomed.playbook), 0, "{table}");
        assert_eq!(count(&store.pool, table, kept.playbook), 1, "{table}");
    }

    playtrail(&store)
        .args(["playbook", "delete", doomed.playbook.to_string().as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("playbook not found"));
}

// ---------------------------------------------------------------------------
// result
// ---------------------------------------------------------------------------

#[test]
fn test_result_list_scopes() {
    let store = Store::new();
    let run = record_run(
        &store,
        RunOptions {
            status: ResultStatus::Changed,
            ..Default::default()
        },
    );

    for flag in ["--playbook", "--play", "--task", "--host"] {
        let id = match flag {
            "--playbook" => run.playbook,
            "--play" => run.play,
            "--task" => run.task,
            _ => run.host,
        };
        let results = json(&store, &["result", "list", flag, id.to_string().as_str()]);
        assert_eq!(ids(&results), vec![run.result], "{flag}");
        let missing = json(&store, &["result", "list", flag, "9999"]);
        assert!(missing.as_array().unwrap().is_empty(), "{flag}");
    }

    playtrail(&store)
        .args(["result", "list", "--task", "1", "--host", "1"])
        .assert()
        .code(2);
}

#[test]
fn test_result_show_long_appends_payload() {
    let store = Store::new();
    let run = record_default(&store);
    let id = run.result.to_string();
    let stored: String = store
        .pool
        .get()
        .unwrap()
        .query_row("SELECT result_json FROM results WHERE id = ?1", [run.result], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, r#"{"stdout":"up 3 days","rc":0}"#);

    let short = playtrail(&store).args(["result", "show", &id]).assert().success();
    let short = String::from_utf8(short.get_output().stdout.clone()).unwrap();
    assert!(!short.contains("up 3 days"));

    playtrail(&store)
        .args(["result", "show", &id, "--long"])
        .assert()
        .success()
        .stdout(predicate::str::contains(stored.as_str()));

    let data = json(&store, &["result", "show", &id]);
    assert!(data.get("result").is_none());
    let data = json(&store, &["result", "show", &id, "--long"]);
    let (key, payload) = data.as_object().unwrap().iter().last().unwrap();
    assert_eq!(key, "result");
    assert_eq!(serde_json::to_string(payload).unwrap(), stored);

    playtrail(&store).args(["result", "show", "9999"]).assert().failure();
}

// ---------------------------------------------------------------------------
// file
// ---------------------------------------------------------------------------

#[test]
fn test_file_list_and_show() {
    let store = Store::new();
    let run = record_default(&store);
    assert_eq!(ids(&json(&store, &["file", "list"])), vec![run.file]);
    let file = json(&store, &["file", "show", run.file.to_string().as_str()]);
    assert_eq!(file["content"], "- hosts: all\n");
}
