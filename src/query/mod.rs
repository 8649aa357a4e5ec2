//! Read side of the run history: scoped listings and single-row lookups.
//!
//! Listing never fails because a parent is missing; a scope naming an unknown
//! playbook, play, task or host simply matches nothing. Showing a single row
//! that does not exist is a [`StoreError::NotFound`].

pub mod files;
pub mod hosts;
pub mod playbooks;
pub mod plays;
pub mod records;
pub mod results;
pub mod tasks;

use std::fmt;

use rusqlite::{params_from_iter, Connection, OptionalExtension, Params, Row};

use crate::model::Timing;
use crate::storage::{opt_ts_column, ts_column, StoreError};

/// Which rows a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every row in the store.
    All,
    /// Rows of the most recently started playbook (greatest `started`, ties
    /// broken by greatest id). Empty when the store holds no playbook.
    Latest,
    Playbook(i64),
    Play(i64),
    Task(i64),
    Host(i64),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Latest => f.write_str("latest playbook"),
            Scope::Playbook(id) => write!(f, "playbook {id}"),
            Scope::Play(id) => write!(f, "play {id}"),
            Scope::Task(id) => write!(f, "task {id}"),
            Scope::Host(id) => write!(f, "host {id}"),
        }
    }
}

/// How a single row is addressed by `show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    ById(i64),
    /// Human key (host name, record key) within one playbook.
    ByKey { playbook: i64, key: String },
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::ById(id) => write!(f, "id {id}"),
            Lookup::ByKey { playbook, key } => write!(f, "'{key}' in playbook {playbook}"),
        }
    }
}

/// Completion predicate for playbook listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybookFilter {
    #[default]
    Any,
    Complete,
    Incomplete,
}

const LATEST_PLAYBOOK: &str = "(SELECT id FROM playbooks ORDER BY started DESC, id DESC LIMIT 1)";

/// Id of the playbook `Scope::Latest` resolves to.
pub fn latest_playbook_id(conn: &Connection) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row(&format!("SELECT {LATEST_PLAYBOOK}"), [], |row| row.get::<_, Option<i64>>(0))
        .optional()?
        .flatten())
}

/// A WHERE fragment with at most one bound id.
#[derive(Debug)]
pub(crate) struct Filter {
    clause: String,
    param: Option<i64>,
}

impl Filter {
    pub(crate) fn everything() -> Self {
        Self {
            clause: "1 = 1".to_string(),
            param: None,
        }
    }

    pub(crate) fn eq(column: &str, id: i64) -> Self {
        Self {
            clause: format!("{column} = ?1"),
            param: Some(id),
        }
    }

    pub(crate) fn raw(clause: impl Into<String>, id: i64) -> Self {
        Self {
            clause: clause.into(),
            param: Some(id),
        }
    }

    /// Filter for the scopes every playbook-owned entity understands.
    pub(crate) fn for_playbook_scope(entity: &'static str, scope: Scope) -> Result<Self, StoreError> {
        match scope {
            Scope::All => Ok(Self::everything()),
            Scope::Latest => Ok(Self {
                clause: format!("playbook_id = {LATEST_PLAYBOOK}"),
                param: None,
            }),
            Scope::Playbook(id) => Ok(Self::eq("playbook_id", id)),
            other => Err(unsupported(entity, other)),
        }
    }
}

pub(crate) fn unsupported(entity: &'static str, scope: Scope) -> StoreError {
    StoreError::UnsupportedScope {
        entity,
        scope: scope.to_string(),
    }
}

/// Run `select` restricted by `filter`, ordered by id.
pub(crate) fn list_where<T>(
    conn: &Connection,
    select: &str,
    filter: &Filter,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let sql = format!("{select} WHERE {} ORDER BY id", filter.clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(filter.param.iter()), map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch exactly one row or report it missing.
pub(crate) fn fetch_one<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
    entity: &'static str,
    lookup: &dyn fmt::Display,
) -> Result<T, StoreError> {
    conn.query_row(sql, params, map)
        .optional()?
        .ok_or_else(|| StoreError::not_found(entity, lookup))
}

/// Read `started, ended, updated, duration_us` starting at column `first`.
pub(crate) fn timing_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Timing> {
    Ok(Timing {
        started: ts_column(row, first)?,
        ended: opt_ts_column(row, first + 1)?,
        updated: ts_column(row, first + 2)?,
        duration_us: row.get(first + 3)?,
    })
}
