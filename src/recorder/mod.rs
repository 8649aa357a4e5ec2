//! Write side of the run history.
//!
//! The automation tool's callback is an external producer; it reports a run
//! as it progresses through the [`Recorder`] (directly, or as JSON lines via
//! [`events`]). Every call is one transaction.

pub mod events;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use tracing::debug;

use crate::model::ResultStatus;
use crate::storage::{format_ts, parse_ts, Pool, StoreError};

#[derive(Debug, Clone, Default)]
pub struct NewPlaybook {
    pub path: String,
    pub ansible_version: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub play_id: i64,
    pub file_id: i64,
    pub action: String,
    pub name: String,
    pub lineno: i64,
    pub tags: Vec<String>,
    pub handler: bool,
}

#[derive(Debug, Clone)]
pub struct NewResult {
    pub task_id: i64,
    pub host: String,
    pub status: ResultStatus,
    pub changed: bool,
    pub ignore_errors: bool,
    pub result: serde_json::Value,
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
}

/// Persists run events into the store.
#[derive(Clone)]
pub struct Recorder {
    pool: Pool,
}

impl Recorder {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn start_playbook(&self, playbook: &NewPlaybook, at: DateTime<Utc>) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let parameters = if playbook.parameters.is_null() {
            "{}".to_string()
        } else {
            serde_json::to_string(&playbook.parameters)?
        };
        let ts = format_ts(&at);
        conn.execute(
            "INSERT INTO playbooks (path, ansible_version, parameters_json, completed, started, updated, duration_us)
             VALUES (?1, ?2, ?3, 0, ?4, ?4, 0)",
            params![playbook.path, playbook.ansible_version, parameters, ts],
        )?;
        let id = conn.last_insert_rowid();
        debug!(playbook_id = id, path = %playbook.path, "playbook started");
        Ok(id)
    }

    /// Close a playbook; `completed` is false for runs that were interrupted.
    pub fn end_playbook(&self, playbook_id: i64, at: DateTime<Utc>, completed: bool) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        finish(&tx, "playbooks", "playbook", playbook_id, at)?;
        tx.execute(
            "UPDATE playbooks SET completed = ?1 WHERE id = ?2",
            params![completed, playbook_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Register a source file; an existing path in the same playbook is reused.
    pub fn file(&self, playbook_id: i64, path: &str, content: Option<&str>) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO files (playbook_id, path, content) VALUES (?1, ?2, ?3)
             ON CONFLICT (playbook_id, path) DO UPDATE SET content = excluded.content
             WHERE excluded.content <> ''",
            params![playbook_id, path, content.unwrap_or_default()],
        )?;
        let id = tx.query_row(
            "SELECT id FROM files WHERE playbook_id = ?1 AND path = ?2",
            params![playbook_id, path],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn start_play(&self, playbook_id: i64, name: &str, at: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let ts = format_ts(&at);
        tx.execute(
            "INSERT INTO plays (playbook_id, name, started, updated, duration_us) VALUES (?1, ?2, ?3, ?3, 0)",
            params![playbook_id, name, ts],
        )?;
        let id = tx.last_insert_rowid();
        advance(&tx, "playbooks", playbook_id, at)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn end_play(&self, play_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let playbook_id = finish(&tx, "plays", "play", play_id, at)?;
        advance(&tx, "playbooks", playbook_id, at)?;
        tx.commit()?;
        Ok(())
    }

    pub fn start_task(&self, playbook_id: i64, task: &NewTask, at: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let ts = format_ts(&at);
        tx.execute(
            "INSERT INTO tasks (playbook_id, play_id, file_id, action, name, lineno, tags_json, handler,
                                started, updated, duration_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 0)",
            params![
                playbook_id,
                task.play_id,
                task.file_id,
                task.action,
                task.name,
                task.lineno,
                serde_json::to_string(&task.tags)?,
                task.handler,
                ts
            ],
        )?;
        let id = tx.last_insert_rowid();
        advance(&tx, "plays", task.play_id, at)?;
        advance(&tx, "playbooks", playbook_id, at)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn end_task(&self, task_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let playbook_id = finish(&tx, "tasks", "task", task_id, at)?;
        advance(&tx, "playbooks", playbook_id, at)?;
        tx.commit()?;
        Ok(())
    }

    /// Get or create the host named `name` in a playbook.
    pub fn host(&self, playbook_id: i64, name: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let id = ensure_host(&tx, playbook_id, name)?;
        tx.commit()?;
        Ok(id)
    }

    /// Store one host's outcome for a task and bump that host's counters.
    pub fn record_result(&self, playbook_id: i64, result: &NewResult) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let host_id = ensure_host(&tx, playbook_id, &result.host)?;
        let duration_us = (result.ended - result.started).num_microseconds();
        let ended = format_ts(&result.ended);
        tx.execute(
            "INSERT INTO results (playbook_id, task_id, host_id, status, changed, ignore_errors, result_json,
                                  started, ended, updated, duration_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10)",
            params![
                playbook_id,
                result.task_id,
                host_id,
                result.status.as_str(),
                result.changed,
                result.ignore_errors,
                serde_json::to_string(&result.result)?,
                format_ts(&result.started),
                ended,
                duration_us
            ],
        )?;
        let id = tx.last_insert_rowid();

        let counter = result.status.host_counter();
        tx.execute(
            &format!("UPDATE hosts SET {counter} = {counter} + 1 WHERE id = ?1"),
            params![host_id],
        )?;

        advance(&tx, "tasks", result.task_id, result.ended)?;
        let play_id: Option<i64> = tx
            .query_row("SELECT play_id FROM tasks WHERE id = ?1", params![result.task_id], |row| row.get(0))
            .optional()?;
        if let Some(play_id) = play_id {
            advance(&tx, "plays", play_id, result.ended)?;
        }
        advance(&tx, "playbooks", playbook_id, result.ended)?;

        tx.commit()?;
        debug!(result_id = id, host = %result.host, status = %result.status, "result recorded");
        Ok(id)
    }

    /// Set a key/value fact on a playbook, replacing any previous value.
    pub fn set_record(&self, playbook_id: i64, key: &str, value: &str, kind: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO records (playbook_id, key, value, type) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (playbook_id, key) DO UPDATE SET value = excluded.value, type = excluded.type",
            params![playbook_id, key, value, kind],
        )?;
        let id = tx.query_row(
            "SELECT id FROM records WHERE playbook_id = ?1 AND key = ?2",
            params![playbook_id, key],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }
}

fn ensure_host(tx: &Transaction<'_>, playbook_id: i64, name: &str) -> Result<i64, StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO hosts (playbook_id, name) VALUES (?1, ?2)",
        params![playbook_id, name],
    )?;
    Ok(tx.query_row(
        "SELECT id FROM hosts WHERE playbook_id = ?1 AND name = ?2",
        params![playbook_id, name],
        |row| row.get(0),
    )?)
}

/// Mark a timed row as ended at `at` and return its playbook id.
fn finish(
    tx: &Transaction<'_>,
    table: &'static str,
    entity: &'static str,
    id: i64,
    at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let owner_column = if table == "playbooks" { "id" } else { "playbook_id" };
    let (started, playbook_id): (String, i64) = tx
        .query_row(
            &format!("SELECT started, {owner_column} FROM {table} WHERE id = ?1"),
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(entity, id))?;

    let duration_us = parse_ts(&started).and_then(|s| (at - s).num_microseconds());
    let ts = format_ts(&at);
    tx.execute(
        &format!("UPDATE {table} SET ended = ?1, updated = ?1, duration_us = ?2 WHERE id = ?3"),
        params![ts, duration_us, id],
    )?;
    Ok(playbook_id)
}

/// Move `updated` forward; rows still running keep `duration_us` equal to
/// `updated - started`.
fn advance(tx: &Transaction<'_>, table: &'static str, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
    let row: Option<(String, Option<String>, String)> = tx
        .query_row(
            &format!("SELECT started, ended, updated FROM {table} WHERE id = ?1"),
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((started, ended, updated)) = row else {
        return Ok(());
    };
    if parse_ts(&updated).is_some_and(|u| u >= at) {
        return Ok(());
    }

    let ts = format_ts(&at);
    if ended.is_none() {
        let duration_us = parse_ts(&started).and_then(|s| (at - s).num_microseconds());
        tx.execute(
            &format!("UPDATE {table} SET updated = ?1, duration_us = ?2 WHERE id = ?3"),
            params![ts, duration_us, id],
        )?;
    } else {
        tx.execute(&format!("UPDATE {table} SET updated = ?1 WHERE id = ?2"), params![ts, id])?;
    }
    Ok(())
}
