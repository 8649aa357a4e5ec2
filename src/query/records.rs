use rusqlite::{params, Connection, Row};

use super::{fetch_one, list_where, Filter, Lookup, Scope};
use crate::model::Record;
use crate::storage::StoreError;

pub(crate) const SELECT: &str = "SELECT id, playbook_id, key, value, type FROM records";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        playbook_id: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        kind: row.get(4)?,
    })
}

pub fn list(conn: &Connection, scope: Scope) -> Result<Vec<Record>, StoreError> {
    let filter = Filter::for_playbook_scope("record", scope)?;
    list_where(conn, SELECT, &filter, from_row)
}

/// Look a record up by id, or by key within a playbook.
pub fn show(conn: &Connection, lookup: &Lookup) -> Result<Record, StoreError> {
    match lookup {
        Lookup::ById(id) => fetch_one(
            conn,
            &format!("{SELECT} WHERE id = ?1"),
            params![id],
            from_row,
            "record",
            lookup,
        ),
        Lookup::ByKey { playbook, key } => fetch_one(
            conn,
            &format!("{SELECT} WHERE playbook_id = ?1 AND key = ?2"),
            params![playbook, key],
            from_row,
            "record",
            lookup,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::testing::{sample_run, SampleRun};
    use crate::storage::open_memory_pool;

    #[test]
    fn test_show_by_key() {
        let pool = open_memory_pool().unwrap();
        let run = sample_run(&pool, SampleRun::default());
        let conn = pool.get().unwrap();

        let record = show(
            &conn,
            &Lookup::ByKey {
                playbook: run.playbook,
                key: "ticket".to_string(),
            },
        )
        .unwrap();
        assert_eq!(Some(record.id), run.record);
        assert_eq!(record.value, "OPS-42");

        let missing = show(
            &conn,
            &Lookup::ByKey {
                playbook: run.playbook,
                key: "nope".to_string(),
            },
        );
        assert!(missing.unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_without_records() {
        let pool = open_memory_pool().unwrap();
        let run = sample_run(
            &pool,
            SampleRun {
                record: false,
                ..Default::default()
            },
        );
        let conn = pool.get().unwrap();
        assert!(list(&conn, Scope::Playbook(run.playbook)).unwrap().is_empty());
        assert!(list(&conn, Scope::Playbook(run.playbook + 1)).unwrap().is_empty());
    }
}
