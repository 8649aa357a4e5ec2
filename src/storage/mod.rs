//! SQLite storage layer -- pool, schema, migrations, cascading delete.

pub mod backfill;
pub mod cascade;
pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::Row;
use thiserror::Error;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {lookup}")]
    NotFound { entity: &'static str, lookup: String },

    #[error("{scope} is not a valid filter for {entity}")]
    UnsupportedScope { entity: &'static str, scope: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error("failed to encode JSON column: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, lookup: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            lookup: lookup.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA temp_store = MEMORY;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    open_pool_migrated(path).map(|(pool, _)| pool)
}

/// Like [`open_pool`], also returning what the migration step did.
pub fn open_pool_migrated(path: &Path) -> Result<(Pool, schema::MigrationOutcome)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));
    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let mut conn = pool.get()?;
    let outcome = schema::migrate(&mut conn)?;
    drop(conn);
    if !outcome.applied.is_empty() {
        tracing::info!(path = %path.display(), applied = ?outcome.applied, "database migrated");
    }

    Ok((pool, outcome))
}

/// In-memory store on a single shared connection. Used by tests and dry runs.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory().with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let mut conn = pool.get()?;
    schema::migrate(&mut conn)?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

/// Timestamps are stored as RFC 3339 text with microsecond precision so that
/// lexical order matches chronological order.
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| bad_column(idx, format!("invalid timestamp '{raw}'")))
}

pub(crate) fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .ok_or_else(|| bad_column(idx, format!("invalid timestamp '{raw}'"))),
        None => Ok(None),
    }
}

pub(crate) fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bad_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}
