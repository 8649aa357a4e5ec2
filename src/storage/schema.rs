//! Database schema and migrations.
//!
//! Version 1 is the base run-history layout. Version 2 stores each entity's
//! elapsed time in a `duration_us` column and backfills it for rows recorded
//! before the column existed.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::backfill::{self, BackfillReport, DURATION_TABLES};
use super::StoreError;

pub const CURRENT_VERSION: u32 = 2;

const BASE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS playbooks (
        id INTEGER PRIMARY KEY,
        path TEXT NOT NULL,
        ansible_version TEXT NOT NULL DEFAULT '',
        parameters_json TEXT NOT NULL DEFAULT '{}',
        completed INTEGER NOT NULL DEFAULT 0,
        started TEXT NOT NULL,
        ended TEXT,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        playbook_id INTEGER NOT NULL REFERENCES playbooks(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        UNIQUE (playbook_id, path)
    );

    CREATE TABLE IF NOT EXISTS plays (
        id INTEGER PRIMARY KEY,
        playbook_id INTEGER NOT NULL REFERENCES playbooks(id) ON DELETE CASCADE,
        name TEXT NOT NULL DEFAULT '',
        started TEXT NOT NULL,
        ended TEXT,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY,
        playbook_id INTEGER NOT NULL REFERENCES playbooks(id) ON DELETE CASCADE,
        play_id INTEGER NOT NULL REFERENCES plays(id) ON DELETE CASCADE,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        action TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        lineno INTEGER NOT NULL DEFAULT 0,
        tags_json TEXT NOT NULL DEFAULT '[]',
        handler INTEGER NOT NULL DEFAULT 0,
        started TEXT NOT NULL,
        ended TEXT,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS hosts (
        id INTEGER PRIMARY KEY,
        playbook_id INTEGER NOT NULL REFERENCES playbooks(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        ok INTEGER NOT NULL DEFAULT 0,
        changed INTEGER NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        skipped INTEGER NOT NULL DEFAULT 0,
        unreachable INTEGER NOT NULL DEFAULT 0,
        UNIQUE (playbook_id, name)
    );

    CREATE TABLE IF NOT EXISTS results (
        id INTEGER PRIMARY KEY,
        playbook_id INTEGER NOT NULL REFERENCES playbooks(id) ON DELETE CASCADE,
        task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        changed INTEGER NOT NULL DEFAULT 0,
        ignore_errors INTEGER NOT NULL DEFAULT 0,
        result_json TEXT NOT NULL DEFAULT '{}',
        started TEXT NOT NULL,
        ended TEXT,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY,
        playbook_id INTEGER NOT NULL REFERENCES playbooks(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL DEFAULT 'text',
        UNIQUE (playbook_id, key)
    );

    CREATE INDEX IF NOT EXISTS idx_playbooks_started ON playbooks(started);
    CREATE INDEX IF NOT EXISTS idx_plays_playbook ON plays(playbook_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_playbook ON tasks(playbook_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_play ON tasks(play_id);
    CREATE INDEX IF NOT EXISTS idx_results_playbook ON results(playbook_id);
    CREATE INDEX IF NOT EXISTS idx_results_task ON results(task_id);
    CREATE INDEX IF NOT EXISTS idx_results_host ON results(host_id);";

/// What a call to [`migrate`] changed.
#[derive(Debug, Default, Serialize)]
pub struct MigrationOutcome {
    pub applied: Vec<u32>,
    pub backfill: Option<BackfillReport>,
}

/// Run all pending migrations.
pub fn migrate(conn: &mut Connection) -> Result<MigrationOutcome, StoreError> {
    conn.execute_batch(BASE_SCHEMA)?;
    let mut outcome = MigrationOutcome::default();

    if !is_applied(conn, 1)? {
        mark_applied(conn, 1)?;
        outcome.applied.push(1);
    }

    // Migration: add 'duration_us' to every timed table if missing
    for table in DURATION_TABLES {
        if !has_column(conn, table, "duration_us")? {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN duration_us INTEGER"), [])?;
        }
    }

    if !is_applied(conn, 2)? {
        let report = backfill::backfill_durations(conn)?;
        mark_applied(conn, 2)?;
        outcome.applied.push(2);
        outcome.backfill = Some(report);
    }

    Ok(outcome)
}

/// Highest applied schema version, 0 for an empty database.
pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: Option<u32> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn is_applied(conn: &Connection, version: u32) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_version WHERE version = ?1",
        params![version],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn mark_applied(conn: &Connection, version: u32) -> Result<(), StoreError> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![version])?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        let outcome = migrate(&mut conn).unwrap();
        assert_eq!(outcome.applied, vec![1, 2]);
        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);

        for table in ["playbooks", "plays", "tasks", "results", "hosts", "files", "records"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should start empty");
        }
        for table in DURATION_TABLES {
            assert!(has_column(&conn, table, "duration_us").unwrap());
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        let second = migrate(&mut conn).unwrap();
        assert!(second.applied.is_empty());
        assert!(second.backfill.is_none());
    }

    #[test]
    fn test_legacy_database_is_backfilled_on_open() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(BASE_SCHEMA).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", []).unwrap();
        conn.execute(
            "INSERT INTO playbooks (id, path, started, ended, updated)
             VALUES (1, 'site.yml', '2019-11-08T16:00:00.000000Z', '2019-11-08T16:00:30.000000Z',
                     '2019-11-08T16:05:00.000000Z')",
            [],
        )
        .unwrap();

        let outcome = migrate(&mut conn).unwrap();
        assert_eq!(outcome.applied, vec![2]);
        let report = outcome.backfill.unwrap();
        assert_eq!(report.total_updated(), 1);

        let duration: i64 = conn
            .query_row("SELECT duration_us FROM playbooks WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(duration, 30_000_000);
    }
}
