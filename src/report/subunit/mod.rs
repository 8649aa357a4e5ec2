//! Subunit v2 stream of every recorded result.
//!
//! Each result becomes one test, reported as an in-progress packet at the
//! result's start and a final packet at its end. The final packet carries a
//! JSON attachment describing where the result came from.

pub mod codec;
pub mod disk;

use std::path::Path;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub use codec::{decode, FileContent, Packet, TestStatus};
pub use disk::{fold_tests, write_to_disk, Attachment, TestRecord};

use super::{PlaybookReport, ReportData, ReportError};
use crate::model::{ResultStatus, TaskResult};

pub const ATTACHMENT_MIME: &str = "text/plain; charset=UTF8";

#[derive(Debug, Error)]
pub enum SubunitError {
    #[error("offset {offset}: bad signature byte {found:#04x}")]
    BadSignature { offset: usize, found: u8 },

    #[error("offset {offset}: unsupported packet version in flags {flags:#06x}")]
    BadVersion { offset: usize, flags: u16 },

    #[error("offset {offset}: invalid packet length {length}")]
    BadLength { offset: usize, length: usize },

    #[error("offset {offset}: checksum mismatch (expected {expected:#010x}, computed {actual:#010x})")]
    BadCrc { offset: usize, expected: u32, actual: u32 },

    #[error("offset {offset}: stream truncated")]
    Truncated { offset: usize },

    #[error("offset {offset}: string is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("offset {offset}: timestamp out of range")]
    BadTimestamp { offset: usize },

    #[error("timestamp {0} cannot be encoded")]
    TimestampRange(DateTime<Utc>),

    #[error("value {0} does not fit in a varint")]
    VarintRange(u64),

    #[error("packet of {0} bytes exceeds the maximum packet size")]
    PacketTooLarge(usize),

    #[error("failed to encode attachment: {0}")]
    Attachment(#[from] serde_json::Error),
}

/// Where a result came from; attached to its final packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAttachment {
    pub host: String,
    pub playbook_id: i64,
    pub playbook_path: String,
    pub play_name: String,
    pub task_action: String,
    pub task_action_lineno: i64,
    pub task_id: i64,
    pub task_name: String,
    pub task_path: String,
}

impl ResultAttachment {
    fn for_result(report: &PlaybookReport, result: &TaskResult) -> Self {
        let task = report.task(result.task_id);
        let play = task.and_then(|t| report.play(t.play_id));
        let file = task.and_then(|t| report.file(t.file_id));
        Self {
            host: report.host(result.host_id).map(|h| h.name.clone()).unwrap_or_default(),
            playbook_id: report.playbook.id,
            playbook_path: report.playbook.path.clone(),
            play_name: play.map(|p| p.name.clone()).unwrap_or_default(),
            task_action: task.map(|t| t.action.clone()).unwrap_or_default(),
            task_action_lineno: task.map_or(0, |t| t.lineno),
            task_id: result.task_id,
            task_name: task.map(|t| t.name.clone()).unwrap_or_default(),
            task_path: file.map(|f| f.path.clone()).unwrap_or_default(),
        }
    }

    /// Stable test id for this host's run of the task.
    pub fn test_id(&self) -> String {
        let name = format!(
            "{}.{}:{}.{}@{}",
            self.playbook_path, self.play_name, self.task_path, self.task_name, self.host
        );
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }
}

pub fn status_for(result: &TaskResult) -> TestStatus {
    match result.status {
        ResultStatus::Ok | ResultStatus::Changed => TestStatus::Success,
        ResultStatus::Skipped => TestStatus::Skip,
        ResultStatus::Failed | ResultStatus::Unreachable if result.ignore_errors => TestStatus::Xfail,
        ResultStatus::Failed | ResultStatus::Unreachable => TestStatus::Fail,
    }
}

/// Packets describing one result.
pub fn result_packets(report: &PlaybookReport, result: &TaskResult) -> Result<[Packet; 2], SubunitError> {
    let attachment = ResultAttachment::for_result(report, result);
    let test_id = attachment.test_id();
    let tags = report
        .task(result.task_id)
        .map(|t| t.tags.clone())
        .filter(|tags| !tags.is_empty());

    let started = Packet {
        status: TestStatus::InProgress,
        test_id: Some(test_id.clone()),
        timestamp: Some(result.timing.started),
        runnable: true,
        ..Default::default()
    };
    let finished = Packet {
        status: status_for(result),
        timestamp: Some(result.timing.ended.unwrap_or(result.timing.updated)),
        runnable: true,
        tags,
        mime_type: Some(ATTACHMENT_MIME.to_string()),
        file: Some(FileContent {
            name: test_id.clone(),
            content: Bytes::from(serde_json::to_vec(&attachment)?),
        }),
        eof: true,
        test_id: Some(test_id),
        route_code: None,
    };
    Ok([started, finished])
}

/// Encode every in-scope result, playbook by playbook, in id order.
pub fn encode(data: &ReportData) -> Result<Bytes, SubunitError> {
    let mut out = BytesMut::new();
    for report in &data.playbooks {
        for result in &report.results {
            for packet in result_packets(report, result)? {
                packet.encode(&mut out)?;
            }
        }
    }
    Ok(out.freeze())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubunitSummary {
    pub tests: usize,
    pub bytes: usize,
}

pub fn write(data: &ReportData, path: &Path) -> Result<SubunitSummary, ReportError> {
    let stream = encode(data)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(ReportError::io(parent))?;
    }
    std::fs::write(path, &stream).map_err(ReportError::io(path))?;

    let summary = SubunitSummary {
        tests: data.playbooks.iter().map(|p| p.results.len()).sum(),
        bytes: stream.len(),
    };
    info!(path = %path.display(), tests = summary.tests, bytes = summary.bytes, "subunit stream written");
    Ok(summary)
}
