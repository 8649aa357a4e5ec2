//! Static report generation.
//!
//! Every generator starts from [`resolve`], a read-only pass that collects the
//! in-scope playbooks and everything recorded under them, and then renders
//! that snapshot without touching the store again.

pub mod html;
pub mod junit;
pub mod subunit;

use std::fmt;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use crate::model::{File, Host, Play, Playbook, Record, Task, TaskResult};
use crate::query::{self, PlaybookFilter, Scope};
use crate::storage::StoreError;

/// Which playbooks a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportScope {
    #[default]
    AllPlaybooks,
    Playbook(i64),
}

impl From<Option<i64>> for ReportScope {
    fn from(playbook: Option<i64>) -> Self {
        playbook.map_or(ReportScope::AllPlaybooks, ReportScope::Playbook)
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Subunit(#[from] subunit::SubunitError),
}

impl ReportError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ReportError {
        let path = path.into();
        move |source| ReportError::Io { path, source }
    }
}

/// Soft problems found while generating; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GenerateWarning {
    /// The scope matched no playbook.
    EmptyScope,
}

impl fmt::Display for GenerateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateWarning::EmptyScope => f.write_str("no playbook matched the report scope"),
        }
    }
}

/// One playbook with everything recorded under it.
#[derive(Debug, Clone)]
pub struct PlaybookReport {
    pub playbook: Playbook,
    pub plays: Vec<Play>,
    pub tasks: Vec<Task>,
    pub results: Vec<TaskResult>,
    pub hosts: Vec<Host>,
    pub files: Vec<File>,
    pub records: Vec<Record>,
}

impl PlaybookReport {
    pub fn play(&self, id: i64) -> Option<&Play> {
        self.plays.iter().find(|p| p.id == id)
    }

    pub fn task(&self, id: i64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn host(&self, id: i64) -> Option<&Host> {
        self.hosts.iter().find(|h| h.id == id)
    }

    pub fn file(&self, id: i64) -> Option<&File> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn task_results(&self, task_id: i64) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(move |r| r.task_id == task_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportData {
    pub playbooks: Vec<PlaybookReport>,
}

impl ReportData {
    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.playbooks.iter().map(|p| p.tasks.len()).sum()
    }
}

/// Collect the playbooks in `scope`. An unknown playbook id yields empty data.
pub fn resolve(conn: &Connection, scope: ReportScope) -> Result<ReportData, StoreError> {
    let playbooks = match scope {
        ReportScope::AllPlaybooks => query::playbooks::list(conn, PlaybookFilter::Any)?,
        ReportScope::Playbook(id) => match query::playbooks::get(conn, id) {
            Ok(playbook) => vec![playbook],
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        },
    };

    let playbooks = playbooks
        .into_iter()
        .map(|playbook| {
            let scope = Scope::Playbook(playbook.id);
            Ok(PlaybookReport {
                plays: query::plays::list(conn, scope)?,
                tasks: query::tasks::list(conn, scope)?,
                results: query::results::list(conn, scope)?,
                hosts: query::hosts::list(conn, scope)?,
                files: query::files::list(conn, scope)?,
                records: query::records::list(conn, scope)?,
                playbook,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

    tracing::debug!(playbooks = playbooks.len(), ?scope, "report scope resolved");
    Ok(ReportData { playbooks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::testing::{sample_run, SampleRun};
    use crate::storage::open_memory_pool;

    #[test]
    fn test_resolve_scopes() {
        let pool = open_memory_pool().unwrap();
        let first = sample_run(&pool, SampleRun::default());
        sample_run(
            &pool,
            SampleRun {
                failing_task: true,
                ..Default::default()
            },
        );
        let conn = pool.get().unwrap();

        let all = resolve(&conn, ReportScope::AllPlaybooks).unwrap();
        assert_eq!(all.playbooks.len(), 2);
        assert_eq!(all.task_count(), 3);

        let one = resolve(&conn, ReportScope::Playbook(first.playbook)).unwrap();
        assert_eq!(one.playbooks.len(), 1);
        let report = &one.playbooks[0];
        assert_eq!(report.playbook.id, first.playbook);
        assert_eq!(report.task_results(first.task).count(), 1);
        assert!(report.host(first.host).is_some());
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_unknown_playbook_is_empty() {
        let pool = open_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert!(resolve(&conn, ReportScope::Playbook(42)).unwrap().is_empty());
    }
}
