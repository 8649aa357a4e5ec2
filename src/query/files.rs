use rusqlite::{params, Connection, Row};

use super::{fetch_one, list_where, Filter, Lookup, Scope};
use crate::model::File;
use crate::storage::StoreError;

pub(crate) const SELECT: &str = "SELECT id, playbook_id, path, content FROM files";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        playbook_id: row.get(1)?,
        path: row.get(2)?,
        content: row.get(3)?,
    })
}

pub fn list(conn: &Connection, scope: Scope) -> Result<Vec<File>, StoreError> {
    let filter = Filter::for_playbook_scope("file", scope)?;
    list_where(conn, SELECT, &filter, from_row)
}

pub fn get(conn: &Connection, id: i64) -> Result<File, StoreError> {
    fetch_one(
        conn,
        &format!("{SELECT} WHERE id = ?1"),
        params![id],
        from_row,
        "file",
        &Lookup::ById(id),
    )
}
