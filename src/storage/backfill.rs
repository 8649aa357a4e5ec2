//! One-time computation of `duration_us` for rows recorded without it.
//!
//! Each table is processed in its own transaction. Rows are handled one at a
//! time: a row whose timestamps cannot be read is skipped and left NULL, the
//! rest of the table is still updated.

use chrono::Duration;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use super::{parse_ts, StoreError};

/// Tables carrying `started`/`ended`/`updated` and a derived duration.
pub const DURATION_TABLES: [&str; 4] = ["playbooks", "plays", "tasks", "results"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableBackfill {
    pub table: &'static str,
    /// Rows that received a duration in this pass.
    pub updated: usize,
    /// Rows that already had one and were left untouched.
    pub untouched: usize,
    /// Rows whose timestamps could not be parsed.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub tables: Vec<TableBackfill>,
}

impl BackfillReport {
    pub fn total_updated(&self) -> usize {
        self.tables.iter().map(|t| t.updated).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.tables.iter().map(|t| t.skipped).sum()
    }
}

/// Fill in every NULL `duration_us`. Running it again is a no-op.
pub fn backfill_durations(conn: &mut Connection) -> Result<BackfillReport, StoreError> {
    let mut report = BackfillReport::default();
    for table in DURATION_TABLES {
        let stats = backfill_table(conn, table)?;
        debug!(table, updated = stats.updated, skipped = stats.skipped, "duration backfill");
        report.tables.push(stats);
    }
    Ok(report)
}

type PendingRow = (i64, Option<String>, Option<String>, Option<String>);

fn backfill_table(conn: &mut Connection, table: &'static str) -> Result<TableBackfill, StoreError> {
    let tx = conn.transaction()?;
    let mut stats = TableBackfill {
        table,
        ..Default::default()
    };

    let untouched: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM {table} WHERE duration_us IS NOT NULL"),
        [],
        |row| row.get(0),
    )?;
    stats.untouched = untouched as usize;

    let pending: Vec<PendingRow> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT id, started, ended, updated FROM {table} WHERE duration_us IS NULL ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    {
        let mut update = tx.prepare(&format!("UPDATE {table} SET duration_us = ?1 WHERE id = ?2"))?;
        for (id, started, ended, updated) in pending {
            match legacy_duration(started.as_deref(), ended.as_deref(), updated.as_deref())
                .and_then(|d| d.num_microseconds())
            {
                Some(us) => {
                    update.execute(params![us, id])?;
                    stats.updated += 1;
                }
                None => {
                    warn!(table, id, ?started, "cannot derive duration, leaving it unset");
                    stats.skipped += 1;
                }
            }
        }
    }

    tx.commit()?;
    Ok(stats)
}

/// `ended - started` when the row finished, otherwise `updated - started`.
fn legacy_duration(started: Option<&str>, ended: Option<&str>, updated: Option<&str>) -> Option<Duration> {
    let started = parse_ts(started?)?;
    let end = match ended {
        Some(raw) => parse_ts(raw)?,
        None => parse_ts(updated?)?,
    };
    Some(end - started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::migrate(&mut conn).unwrap();
        conn
    }

    fn insert_playbook(conn: &Connection, id: i64, started: &str, ended: Option<&str>, updated: &str) {
        conn.execute(
            "INSERT INTO playbooks (id, path, started, ended, updated) VALUES (?1, 'p.yml', ?2, ?3, ?4)",
            params![id, started, ended, updated],
        )
        .unwrap();
    }

    fn duration_of(conn: &Connection, table: &str, id: i64) -> Option<i64> {
        conn.query_row(&format!("SELECT duration_us FROM {table} WHERE id = ?1"), [id], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_uses_ended_then_updated() {
        let mut conn = migrated();
        insert_playbook(&conn, 1, "2019-11-08T16:00:00Z", Some("2019-11-08T16:00:10Z"), "2019-11-08T17:00:00Z");
        insert_playbook(&conn, 2, "2019-11-08T16:00:00Z", None, "2019-11-08T16:00:04.500000Z");

        let report = backfill_durations(&mut conn).unwrap();
        assert_eq!(report.total_updated(), 2);
        assert_eq!(duration_of(&conn, "playbooks", 1), Some(10_000_000));
        assert_eq!(duration_of(&conn, "playbooks", 2), Some(4_500_000));
    }

    #[test]
    fn test_existing_duration_is_left_alone() {
        let mut conn = migrated();
        insert_playbook(&conn, 1, "2019-11-08T16:00:00Z", Some("2019-11-08T16:00:10Z"), "2019-11-08T16:00:10Z");
        conn.execute("UPDATE playbooks SET duration_us = 42 WHERE id = 1", []).unwrap();

        let report = backfill_durations(&mut conn).unwrap();
        assert_eq!(report.total_updated(), 0);
        assert_eq!(report.tables[0].untouched, 1);
        assert_eq!(duration_of(&conn, "playbooks", 1), Some(42));
    }

    #[test]
    fn test_second_pass_is_noop() {
        let mut conn = migrated();
        insert_playbook(&conn, 1, "2019-11-08T16:00:00Z", None, "2019-11-08T16:01:00Z");

        let first = backfill_durations(&mut conn).unwrap();
        assert_eq!(first.total_updated(), 1);
        let second = backfill_durations(&mut conn).unwrap();
        assert_eq!(second.total_updated(), 0);
        assert_eq!(duration_of(&conn, "playbooks", 1), Some(60_000_000));
    }

    #[test]
    fn test_unreadable_row_does_not_block_others() {
        let mut conn = migrated();
        insert_playbook(&conn, 1, "", None, "2019-11-08T16:01:00Z");
        insert_playbook(&conn, 2, "2019-11-08T16:00:00Z", None, "2019-11-08T16:00:02Z");

        let report = backfill_durations(&mut conn).unwrap();
        assert_eq!(report.total_skipped(), 1);
        assert_eq!(report.total_updated(), 1);
        assert_eq!(duration_of(&conn, "playbooks", 1), None);
        assert_eq!(duration_of(&conn, "playbooks", 2), Some(2_000_000));
    }

    #[test]
    fn test_every_timed_table_is_covered() {
        let mut conn = migrated();
        insert_playbook(&conn, 1, "2019-11-08T16:00:00Z", Some("2019-11-08T16:10:00Z"), "2019-11-08T16:10:00Z");
        conn.execute_batch(
            "INSERT INTO files (id, playbook_id, path) VALUES (1, 1, 'p.yml');
             INSERT INTO hosts (id, playbook_id, name) VALUES (1, 1, 'localhost');
             INSERT INTO plays (id, playbook_id, name, started, updated)
                 VALUES (1, 1, 'play', '2019-11-08T16:00:00Z', '2019-11-08T16:00:03Z');
             INSERT INTO tasks (id, playbook_id, play_id, file_id, action, started, ended, updated)
                 VALUES (1, 1, 1, 1, 'debug', '2019-11-08T16:00:00Z', '2019-11-08T16:00:01Z', '2019-11-08T16:00:09Z');
             INSERT INTO results (id, playbook_id, task_id, host_id, status, started, updated)
                 VALUES (1, 1, 1, 1, 'ok', '2019-11-08T16:00:00Z', '2019-11-08T16:00:00.250000Z');",
        )
        .unwrap();

        let report = backfill_durations(&mut conn).unwrap();
        assert_eq!(report.total_updated(), 4);
        assert_eq!(duration_of(&conn, "plays", 1), Some(3_000_000));
        assert_eq!(duration_of(&conn, "tasks", 1), Some(1_000_000));
        assert_eq!(duration_of(&conn, "results", 1), Some(250_000));
    }
}
