use rusqlite::{params, Connection, Row};

use super::{fetch_one, list_where, timing_from_row, Filter, Lookup, PlaybookFilter};
use crate::model::Playbook;
use crate::storage::{json_column, StoreError};

pub(crate) const SELECT: &str = "SELECT id, path, ansible_version, parameters_json, completed,
        started, ended, updated, duration_us FROM playbooks";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Playbook> {
    Ok(Playbook {
        id: row.get(0)?,
        path: row.get(1)?,
        ansible_version: row.get(2)?,
        parameters: json_column(row, 3)?,
        completed: row.get(4)?,
        timing: timing_from_row(row, 5)?,
    })
}

pub fn list(conn: &Connection, filter: PlaybookFilter) -> Result<Vec<Playbook>, StoreError> {
    let filter = match filter {
        PlaybookFilter::Any => Filter::everything(),
        PlaybookFilter::Complete => Filter::eq("completed", 1),
        PlaybookFilter::Incomplete => Filter::eq("completed", 0),
    };
    list_where(conn, SELECT, &filter, from_row)
}

pub fn get(conn: &Connection, id: i64) -> Result<Playbook, StoreError> {
    fetch_one(
        conn,
        &format!("{SELECT} WHERE id = ?1"),
        params![id],
        from_row,
        "playbook",
        &Lookup::ById(id),
    )
}
