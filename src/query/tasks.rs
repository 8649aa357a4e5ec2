use rusqlite::{params, Connection, Row};

use super::{fetch_one, list_where, timing_from_row, unsupported, Filter, Lookup, Scope};
use crate::model::Task;
use crate::storage::{json_column, StoreError};

pub(crate) const SELECT: &str = "SELECT id, playbook_id, play_id, file_id, action, name, lineno, tags_json,
        handler, started, ended, updated, duration_us FROM tasks";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        playbook_id: row.get(1)?,
        play_id: row.get(2)?,
        file_id: row.get(3)?,
        action: row.get(4)?,
        name: row.get(5)?,
        lineno: row.get(6)?,
        tags: json_column(row, 7)?,
        handler: row.get(8)?,
        timing: timing_from_row(row, 9)?,
    })
}

/// Tasks for `Scope::{All, Latest, Playbook, Play}`.
pub fn list(conn: &Connection, scope: Scope) -> Result<Vec<Task>, StoreError> {
    let filter = match scope {
        Scope::Play(id) => Filter::eq("play_id", id),
        Scope::Task(_) | Scope::Host(_) => return Err(unsupported("task", scope)),
        _ => Filter::for_playbook_scope("task", scope)?,
    };
    list_where(conn, SELECT, &filter, from_row)
}

pub fn get(conn: &Connection, id: i64) -> Result<Task, StoreError> {
    fetch_one(
        conn,
        &format!("{SELECT} WHERE id = ?1"),
        params![id],
        from_row,
        "task",
        &Lookup::ById(id),
    )
}
