//! Playbook deletion.
//!
//! Dependent tables are emptied in dependency order inside one transaction, so
//! a reader sees either the whole playbook or none of it. The schema also
//! declares `ON DELETE CASCADE`; the explicit walk keeps the per-table counts.

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

use super::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub results: usize,
    pub tasks: usize,
    pub plays: usize,
    pub hosts: usize,
    pub files: usize,
    pub records: usize,
}

impl DeleteSummary {
    pub fn total(&self) -> usize {
        self.results + self.tasks + self.plays + self.hosts + self.files + self.records + 1
    }
}

/// Delete a playbook and everything recorded under it.
pub fn delete_playbook(conn: &mut Connection, playbook_id: i64) -> Result<DeleteSummary, StoreError> {
    let tx = conn.transaction()?;

    let exists: i64 = tx.query_row("SELECT COUNT(*) FROM playbooks WHERE id = ?1", params![playbook_id], |row| {
        row.get(0)
    })?;
    if exists == 0 {
        return Err(StoreError::not_found("playbook", playbook_id));
    }

    let owned = |table: &str| -> Result<usize, StoreError> {
        Ok(tx.execute(&format!("DELETE FROM {table} WHERE playbook_id = ?1"), params![playbook_id])?)
    };

    let summary = DeleteSummary {
        results: owned("results")?,
        tasks: owned("tasks")?,
        plays: owned("plays")?,
        hosts: owned("hosts")?,
        files: owned("files")?,
        records: owned("records")?,
    };
    tx.execute("DELETE FROM playbooks WHERE id = ?1", params![playbook_id])?;
    tx.commit()?;

    info!(playbook_id, rows = summary.total(), "playbook deleted");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::testing::{sample_run, SampleRun};
    use crate::storage::open_memory_pool;

    fn rows(conn: &Connection, table: &str, playbook_id: i64) -> i64 {
        let column = if table == "playbooks" { "id" } else { "playbook_id" };
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
            params![playbook_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_delete_leaves_other_playbooks() {
        let pool = open_memory_pool().unwrap();
        let doomed = sample_run(
            &pool,
            SampleRun {
                failing_task: true,
                ..Default::default()
            },
        );
        let kept = sample_run(&pool, SampleRun::default());
        let mut conn = pool.get().unwrap();

        let summary = delete_playbook(&mut conn, doomed.playbook).unwrap();
        assert_eq!(summary.tasks, 2);
        assert_eq!(summary.results, 2);
        assert_eq!(summary.records, 1);

        for table in ["playbooks", "plays", "tasks", "results", "hosts", "files", "records"] {
            assert_eq!(rows(&conn, table, doomed.playbook), 0, "{table}");
            assert_eq!(rows(&conn, table, kept.playbook), 1, "{table}");
        }
    }

    #[test]
    fn test_delete_missing_playbook() {
        let pool = open_memory_pool().unwrap();
        let mut conn = pool.get().unwrap();
        let err = delete_playbook(&mut conn, 42).unwrap_err();
        assert!(err.is_not_found());
    }
}
