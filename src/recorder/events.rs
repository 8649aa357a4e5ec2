//! Newline-delimited JSON run events.
//!
//! Each line is one event tagged by `"event"`. Events refer implicitly to the
//! playbook, play and task opened most recently, the same order a callback
//! plugin observes them in.

use std::io::BufRead;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::{NewPlaybook, NewResult, NewTask, Recorder};
use crate::model::ResultStatus;
use crate::storage::StoreError;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PlaybookStart {
        path: String,
        #[serde(default)]
        ansible_version: String,
        #[serde(default)]
        parameters: serde_json::Value,
        at: DateTime<Utc>,
    },
    File {
        path: String,
        #[serde(default)]
        content: Option<String>,
    },
    PlayStart {
        #[serde(default)]
        name: String,
        at: DateTime<Utc>,
    },
    TaskStart {
        #[serde(default)]
        name: String,
        action: String,
        /// File declaring the task; registered on first use.
        path: String,
        #[serde(default)]
        lineno: i64,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        handler: bool,
        at: DateTime<Utc>,
    },
    Result {
        host: String,
        status: ResultStatus,
        #[serde(default)]
        changed: bool,
        #[serde(default)]
        ignore_errors: bool,
        #[serde(default)]
        result: serde_json::Value,
        started: DateTime<Utc>,
        ended: DateTime<Utc>,
    },
    TaskEnd {
        at: DateTime<Utc>,
    },
    PlayEnd {
        at: DateTime<Utc>,
    },
    Record {
        key: String,
        value: String,
        #[serde(default = "default_record_type", rename = "type")]
        kind: String,
    },
    PlaybookEnd {
        at: DateTime<Utc>,
        #[serde(default = "default_true")]
        completed: bool,
    },
}

fn default_record_type() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("line {line}: invalid event: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: '{event}' received before any {needs} was started")]
    OutOfOrder {
        line: usize,
        event: &'static str,
        needs: &'static str,
    },

    #[error("line {line}: {source}")]
    Store {
        line: usize,
        #[source]
        source: StoreError,
    },

    #[error("failed to read events: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub events: usize,
    pub playbooks: Vec<i64>,
    pub results: usize,
}

/// Tracks which playbook/play/task subsequent events belong to.
pub struct Ingestor {
    recorder: Recorder,
    playbook: Option<i64>,
    play: Option<i64>,
    task: Option<i64>,
    summary: IngestSummary,
}

impl Ingestor {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            playbook: None,
            play: None,
            task: None,
            summary: IngestSummary::default(),
        }
    }

    /// Apply every event in `reader`. Blank lines are ignored.
    pub fn ingest<R: BufRead>(mut self, reader: R) -> Result<IngestSummary, IngestError> {
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: RunEvent =
                serde_json::from_str(&line).map_err(|source| IngestError::Parse { line: line_no, source })?;
            self.apply(line_no, event)?;
        }

        if self.playbook.is_some() {
            warn!("event stream ended with a playbook still open");
        }
        info!(
            events = self.summary.events,
            playbooks = self.summary.playbooks.len(),
            results = self.summary.results,
            "ingest finished"
        );
        Ok(self.summary)
    }

    pub fn apply(&mut self, line: usize, event: RunEvent) -> Result<(), IngestError> {
        let store = |source: StoreError| IngestError::Store { line, source };
        let rec = &self.recorder;

        match event {
            RunEvent::PlaybookStart {
                path,
                ansible_version,
                parameters,
                at,
            } => {
                let playbook = NewPlaybook {
                    path,
                    ansible_version,
                    parameters,
                };
                let id = rec.start_playbook(&playbook, at).map_err(store)?;
                // Register the playbook file itself so tasks declared in it resolve.
                rec.file(id, &playbook.path, None).map_err(store)?;
                self.playbook = Some(id);
                self.play = None;
                self.task = None;
                self.summary.playbooks.push(id);
            }
            RunEvent::File { path, content } => {
                let playbook = require(self.playbook, line, "file", "playbook")?;
                rec.file(playbook, &path, content.as_deref()).map_err(store)?;
            }
            RunEvent::PlayStart { name, at } => {
                let playbook = require(self.playbook, line, "play_start", "playbook")?;
                self.play = Some(rec.start_play(playbook, &name, at).map_err(store)?);
                self.task = None;
            }
            RunEvent::TaskStart {
                name,
                action,
                path,
                lineno,
                tags,
                handler,
                at,
            } => {
                let playbook = require(self.playbook, line, "task_start", "playbook")?;
                let play = require(self.play, line, "task_start", "play")?;
                let file_id = rec.file(playbook, &path, None).map_err(store)?;
                let task = NewTask {
                    play_id: play,
                    file_id,
                    action,
                    name,
                    lineno,
                    tags,
                    handler,
                };
                self.task = Some(rec.start_task(playbook, &task, at).map_err(store)?);
            }
            RunEvent::Result {
                host,
                status,
                changed,
                ignore_errors,
                result,
                started,
                ended,
            } => {
                let playbook = require(self.playbook, line, "result", "playbook")?;
                let task_id = require(self.task, line, "result", "task")?;
                let new = NewResult {
                    task_id,
                    host,
                    status,
                    changed,
                    ignore_errors,
                    result,
                    started,
                    ended,
                };
                rec.record_result(playbook, &new).map_err(store)?;
                self.summary.results += 1;
            }
            RunEvent::TaskEnd { at } => {
                let task = require(self.task.take(), line, "task_end", "task")?;
                rec.end_task(task, at).map_err(store)?;
            }
            RunEvent::PlayEnd { at } => {
                let play = require(self.play.take(), line, "play_end", "play")?;
                rec.end_play(play, at).map_err(store)?;
            }
            RunEvent::Record { key, value, kind } => {
                let playbook = require(self.playbook, line, "record", "playbook")?;
                rec.set_record(playbook, &key, &value, &kind).map_err(store)?;
            }
            RunEvent::PlaybookEnd { at, completed } => {
                let playbook = require(self.playbook.take(), line, "playbook_end", "playbook")?;
                rec.end_playbook(playbook, at, completed).map_err(store)?;
                self.play = None;
                self.task = None;
            }
        }

        self.summary.events += 1;
        Ok(())
    }
}

fn require(id: Option<i64>, line: usize, event: &'static str, needs: &'static str) -> Result<i64, IngestError> {
    id.ok_or(IngestError::OutOfOrder { line, event, needs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{self, Scope};
    use crate::storage::open_memory_pool;

    const RUN: &str = r#"
{"event": "playbook_start", "path": "/srv/site.yml", "ansible_version": "2.9.1", "at": "2019-11-08T16:00:00Z"}
{"event": "play_start", "name": "Configure web", "at": "2019-11-08T16:00:00Z"}
{"event": "task_start", "name": "Install nginx", "action": "package", "path": "/srv/roles/web/tasks/main.yml", "lineno": 2, "at": "2019-11-08T16:00:01Z"}
{"event": "result", "host": "web01", "status": "changed", "changed": true, "result": {"changed": true}, "started": "2019-11-08T16:00:01Z", "ended": "2019-11-08T16:00:05Z"}
{"event": "result", "host": "web02", "status": "unreachable", "result": {"msg": "ssh timeout"}, "started": "2019-11-08T16:00:01Z", "ended": "2019-11-08T16:00:11Z"}
{"event": "task_end", "at": "2019-11-08T16:00:11Z"}
{"event": "play_end", "at": "2019-11-08T16:00:12Z"}
{"event": "record", "key": "change_ticket", "value": "CHG-1001"}
{"event": "playbook_end", "at": "2019-11-08T16:00:13Z"}
"#;

    #[test]
    fn test_ingest_full_run() {
        let pool = open_memory_pool().unwrap();
        let summary = Ingestor::new(Recorder::new(pool.clone())).ingest(RUN.as_bytes()).unwrap();
        assert_eq!(summary.events, 9);
        assert_eq!(summary.results, 2);
        assert_eq!(summary.playbooks.len(), 1);

        let conn = pool.get().unwrap();
        let playbook = query::playbooks::get(&conn, summary.playbooks[0]).unwrap();
        assert!(playbook.completed);
        assert_eq!(playbook.timing.duration_us, Some(13_000_000));

        let hosts = query::hosts::list(&conn, Scope::All).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1].unreachable, 1);

        let files = query::files::list(&conn, Scope::All).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/srv/site.yml", "/srv/roles/web/tasks/main.yml"]);

        let records = query::records::list(&conn, Scope::All).unwrap();
        assert_eq!(records[0].kind, "text");
    }

    #[test]
    fn test_result_without_task_is_rejected() {
        let pool = open_memory_pool().unwrap();
        let stream = concat!(
            r#"{"event": "playbook_start", "path": "a.yml", "at": "2019-11-08T16:00:00Z"}"#,
            "\n",
            r#"{"event": "result", "host": "h", "status": "ok", "started": "2019-11-08T16:00:00Z", "ended": "2019-11-08T16:00:00Z"}"#,
        );
        let err = Ingestor::new(Recorder::new(pool)).ingest(stream.as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::OutOfOrder { line: 2, needs: "task", .. }));
    }

    #[test]
    fn test_bad_json_reports_line() {
        let pool = open_memory_pool().unwrap();
        let err = Ingestor::new(Recorder::new(pool)).ingest("\n{nope}\n".as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::Parse { line: 2, .. }));
    }
}
