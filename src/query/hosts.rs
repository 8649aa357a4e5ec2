use rusqlite::{params, Connection, Row};

use super::{fetch_one, list_where, Filter, Lookup, Scope};
use crate::model::Host;
use crate::storage::StoreError;

pub(crate) const SELECT: &str =
    "SELECT id, playbook_id, name, ok, changed, failed, skipped, unreachable FROM hosts";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Host> {
    Ok(Host {
        id: row.get(0)?,
        playbook_id: row.get(1)?,
        name: row.get(2)?,
        ok: row.get(3)?,
        changed: row.get(4)?,
        failed: row.get(5)?,
        skipped: row.get(6)?,
        unreachable: row.get(7)?,
    })
}

pub fn list(conn: &Connection, scope: Scope) -> Result<Vec<Host>, StoreError> {
    let filter = Filter::for_playbook_scope("host", scope)?;
    list_where(conn, SELECT, &filter, from_row)
}

/// Look a host up by id, or by name within a playbook.
pub fn show(conn: &Connection, lookup: &Lookup) -> Result<Host, StoreError> {
    match lookup {
        Lookup::ById(id) => fetch_one(
            conn,
            &format!("{SELECT} WHERE id = ?1"),
            params![id],
            from_row,
            "host",
            lookup,
        ),
        Lookup::ByKey { playbook, key } => fetch_one(
            conn,
            &format!("{SELECT} WHERE playbook_id = ?1 AND name = ?2"),
            params![playbook, key],
            from_row,
            "host",
            lookup,
        ),
    }
}
