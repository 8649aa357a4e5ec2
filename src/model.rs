//! Run-history entities.
//!
//! A [`Playbook`] is the root aggregate; every other entity carries the id of
//! the playbook that owns it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Start/end bookkeeping shared by playbooks, plays, tasks and results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timing {
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
    /// Stored elapsed time in microseconds. `None` only for legacy rows that
    /// predate the backfill.
    pub duration_us: Option<i64>,
}

impl Timing {
    pub fn stored_duration(&self) -> Option<Duration> {
        self.duration_us.map(Duration::microseconds)
    }

    /// Stored duration, or the value the backfill would compute.
    pub fn duration(&self) -> Duration {
        self.stored_duration()
            .unwrap_or_else(|| elapsed(self.started, self.ended, self.updated))
    }
}

/// Elapsed time of an entity: up to `ended` when the run finished, otherwise
/// up to the last update seen.
pub fn elapsed(started: DateTime<Utc>, ended: Option<DateTime<Utc>>, updated: DateTime<Utc>) -> Duration {
    ended.unwrap_or(updated) - started
}

/// Render a duration as `H:MM:SS.ffffff`.
pub fn format_duration(d: Duration) -> String {
    let negative = d < Duration::zero();
    let total_us = d.num_microseconds().unwrap_or(i64::MAX).unsigned_abs();
    let micros = total_us % 1_000_000;
    let secs = total_us / 1_000_000;
    format!(
        "{}{}:{:02}:{:02}.{:06}",
        if negative { "-" } else { "" },
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        micros
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Playbook {
    pub id: i64,
    pub path: String,
    pub ansible_version: String,
    pub parameters: serde_json::Value,
    pub completed: bool,
    #[serde(flatten)]
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Play {
    pub id: i64,
    pub playbook_id: i64,
    pub name: String,
    #[serde(flatten)]
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    pub playbook_id: i64,
    pub play_id: i64,
    pub file_id: i64,
    pub action: String,
    pub name: String,
    pub lineno: i64,
    pub tags: Vec<String>,
    pub handler: bool,
    #[serde(flatten)]
    pub timing: Timing,
}

impl Task {
    /// Name shown in reports; unnamed tasks fall back to their action.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.action
        } else {
            &self.name
        }
    }
}

/// Outcome of one task on one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub id: i64,
    pub playbook_id: i64,
    pub task_id: i64,
    pub host_id: i64,
    pub status: ResultStatus,
    pub changed: bool,
    pub ignore_errors: bool,
    pub result: serde_json::Value,
    #[serde(flatten)]
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Host {
    pub id: i64,
    pub playbook_id: i64,
    pub name: String,
    pub ok: i64,
    pub changed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub unreachable: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct File {
    pub id: i64,
    pub playbook_id: i64,
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: i64,
    pub playbook_id: i64,
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: String,
}

// ---------------------------------------------------------------------------
// ResultStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Changed,
    Failed,
    Skipped,
    Unreachable,
}

#[derive(Debug, Error)]
#[error("unknown result status '{0}'")]
pub struct UnknownStatus(pub String);

impl ResultStatus {
    pub const ALL: [ResultStatus; 5] = [
        ResultStatus::Ok,
        ResultStatus::Changed,
        ResultStatus::Failed,
        ResultStatus::Skipped,
        ResultStatus::Unreachable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Ok => "ok",
            ResultStatus::Changed => "changed",
            ResultStatus::Failed => "failed",
            ResultStatus::Skipped => "skipped",
            ResultStatus::Unreachable => "unreachable",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, ResultStatus::Failed | ResultStatus::Unreachable)
    }

    /// Host counter column bumped when a result with this status is recorded.
    pub(crate) fn host_counter(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResultStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_elapsed_prefers_ended() {
        assert_eq!(elapsed(at(0), Some(at(10)), at(99)), Duration::seconds(10));
        assert_eq!(elapsed(at(0), None, at(99)), Duration::seconds(99));
    }

    #[test]
    fn test_timing_falls_back_to_derived_duration() {
        let timing = Timing {
            started: at(0),
            ended: None,
            updated: at(5),
            duration_us: None,
        };
        assert_eq!(timing.duration(), Duration::seconds(5));

        let stored = Timing {
            duration_us: Some(1_500_000),
            ..timing
        };
        assert_eq!(stored.duration(), Duration::milliseconds(1500));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::microseconds(1_500_000)), "0:00:01.500000");
        assert_eq!(format_duration(Duration::seconds(3723)), "1:02:03.000000");
        assert_eq!(format_duration(Duration::seconds(-2)), "-0:00:02.000000");
    }

    #[test]
    fn test_status_parse() {
        for status in ResultStatus::ALL {
            assert_eq!(status.as_str().parse::<ResultStatus>().unwrap(), status);
        }
        assert!("exploded".parse::<ResultStatus>().is_err());
        assert!(ResultStatus::Unreachable.is_failure());
        assert!(!ResultStatus::Changed.is_failure());
    }
}
