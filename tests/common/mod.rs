//! Shared fixture: records synthetic runs into a scratch database.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use playtrail::model::ResultStatus;
use playtrail::recorder::{NewPlaybook, NewResult, NewTask, Recorder};
use playtrail::storage::{open_pool, Pool};

pub struct Store {
    pub dir: TempDir,
    pub path: PathBuf,
    pub pool: Pool,
}

impl Store {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playtrail.sqlite");
        let pool = open_pool(&path).unwrap();
        Self { dir, path, pool }
    }

    pub fn recorder(&self) -> Recorder {
        Recorder::new(self.pool.clone())
    }

    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Ids of one recorded run.
#[derive(Debug, Clone, Copy)]
pub struct Run {
    pub playbook: i64,
    pub play: i64,
    pub task: i64,
    pub file: i64,
    pub host: i64,
    pub result: i64,
    pub record: i64,
}

pub struct RunOptions<'a> {
    pub path: &'a str,
    pub host: &'a str,
    pub status: ResultStatus,
    pub completed: bool,
    pub offset: Duration,
}

impl Default for RunOptions<'_> {
    fn default() -> Self {
        Self {
            path: "/srv/playbooks/site.yml",
            host: "localhost",
            status: ResultStatus::Ok,
            completed: true,
            offset: Duration::zero(),
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 11, 8, 16, 0, 0).unwrap()
}

/// One playbook, one play, one task, one result on one host, one record.
pub fn record_run(store: &Store, opts: RunOptions<'_>) -> Run {
    let rec = store.recorder();
    let start = t0() + opts.offset;
    let s = Duration::seconds;

    let playbook = rec
        .start_playbook(
            &NewPlaybook {
                path: opts.path.to_string(),
                ansible_version: "2.9.1".to_string(),
                parameters: json!({"verbosity": 0}),
            },
            start,
        )
        .unwrap();
    let file = rec.file(playbook, opts.path, Some("- hosts: all\n")).unwrap();
    let play = rec.start_play(playbook, "Configure", start).unwrap();
    let task = rec
        .start_task(
            playbook,
            &NewTask {
                play_id: play,
                file_id: file,
                action: "command".to_string(),
                name: "Run uptime".to_string(),
                lineno: 4,
                tags: vec![],
                handler: false,
            },
            start + s(1),
        )
        .unwrap();
    let result = rec
        .record_result(
            playbook,
            &NewResult {
                task_id: task,
                host: opts.host.to_string(),
                status: opts.status,
                changed: opts.status == ResultStatus::Changed,
                ignore_errors: false,
                result: json!({"stdout": "up 3 days", "rc": 0}),
                started: start + s(1),
                ended: start + s(3),
            },
        )
        .unwrap();
    rec.end_task(task, start + s(3)).unwrap();
    let record = rec.set_record(playbook, "build", "1234", "text").unwrap();
    rec.end_play(play, start + s(4)).unwrap();
    if opts.completed {
        rec.end_playbook(playbook, start + s(5), true).unwrap();
    }
    let host = rec.host(playbook, opts.host).unwrap();

    Run {
        playbook,
        play,
        task,
        file,
        host,
        result,
        record,
    }
}

pub fn record_default(store: &Store) -> Run {
    record_run(store, RunOptions::default())
}

pub fn count(pool: &Pool, table: &str, playbook: i64) -> i64 {
    let column = if table == "playbooks" { "id" } else { "playbook_id" };
    pool.get()
        .unwrap()
        .query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
            [playbook],
            |row| row.get(0),
        )
        .unwrap()
}

pub fn exists(root: &Path, rel: &str) -> bool {
    root.join(rel).exists()
}
