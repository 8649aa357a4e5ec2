use rusqlite::{params, Connection, Row};

use super::{fetch_one, list_where, timing_from_row, Filter, Lookup, Scope};
use crate::model::Play;
use crate::storage::StoreError;

pub(crate) const SELECT: &str = "SELECT id, playbook_id, name, started, ended, updated, duration_us FROM plays";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Play> {
    Ok(Play {
        id: row.get(0)?,
        playbook_id: row.get(1)?,
        name: row.get(2)?,
        timing: timing_from_row(row, 3)?,
    })
}

/// Plays for `Scope::{All, Latest, Playbook}`.
pub fn list(conn: &Connection, scope: Scope) -> Result<Vec<Play>, StoreError> {
    let filter = Filter::for_playbook_scope("play", scope)?;
    list_where(conn, SELECT, &filter, from_row)
}

pub fn get(conn: &Connection, id: i64) -> Result<Play, StoreError> {
    fetch_one(
        conn,
        &format!("{SELECT} WHERE id = ?1"),
        params![id],
        from_row,
        "play",
        &Lookup::ById(id),
    )
}
