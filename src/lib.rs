//! playtrail -- run history and static reports for automation playbooks.
//!
//! Runs are recorded into SQLite through [`recorder`], read back through
//! [`query`], and rendered as HTML, JUnit XML or subunit v2 by [`report`].

pub mod cli;
pub mod config;
pub mod model;
pub mod query;
pub mod recorder;
pub mod report;
pub mod storage;
