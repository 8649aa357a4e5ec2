use rusqlite::{params, Connection, Row};

use super::{fetch_one, list_where, timing_from_row, Filter, Lookup, Scope};
use crate::model::TaskResult;
use crate::storage::{json_column, StoreError};

pub(crate) const SELECT: &str = "SELECT id, playbook_id, task_id, host_id, status, changed, ignore_errors,
        result_json, started, ended, updated, duration_us FROM results";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<TaskResult> {
    let status: String = row.get(4)?;
    Ok(TaskResult {
        id: row.get(0)?,
        playbook_id: row.get(1)?,
        task_id: row.get(2)?,
        host_id: row.get(3)?,
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?,
        changed: row.get(5)?,
        ignore_errors: row.get(6)?,
        result: json_column(row, 7)?,
        timing: timing_from_row(row, 8)?,
    })
}

/// Results for any scope.
pub fn list(conn: &Connection, scope: Scope) -> Result<Vec<TaskResult>, StoreError> {
    let filter = match scope {
        Scope::Play(id) => Filter::raw("task_id IN (SELECT id FROM tasks WHERE play_id = ?1)", id),
        Scope::Task(id) => Filter::eq("task_id", id),
        Scope::Host(id) => Filter::eq("host_id", id),
        _ => Filter::for_playbook_scope("result", scope)?,
    };
    list_where(conn, SELECT, &filter, from_row)
}

pub fn get(conn: &Connection, id: i64) -> Result<TaskResult, StoreError> {
    fetch_one(
        conn,
        &format!("{SELECT} WHERE id = ?1"),
        params![id],
        from_row,
        "result",
        &Lookup::ById(id),
    )
}
