//! Fold a packet stream into per-test records and dump them to a directory
//! tree (`<dir>/<test id>/test.json` plus one file per attachment).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use super::codec::{Packet, TestStatus};
use crate::report::ReportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: Option<String>,
    pub content: Vec<u8>,
}

/// Everything the stream said about one test.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestRecord {
    pub id: String,
    pub status: Option<TestStatus>,
    pub tags: BTreeSet<String>,
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
    pub details: BTreeMap<String, Attachment>,
}

impl TestRecord {
    /// The `test.json` document: `status, tags, stop, start, details, id`.
    pub fn envelope(&self) -> Value {
        let ts = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true));
        json!({
            "status": self.status.map(TestStatus::as_str),
            "tags": self.tags.iter().collect::<Vec<_>>(),
            "stop": ts(&self.stop),
            "start": ts(&self.start),
            "details": self.details.keys().collect::<Vec<_>>(),
            "id": self.id,
        })
    }
}

/// Group packets by test id, in first-seen order. Packets without a test id
/// are ignored.
pub fn fold_tests(packets: &[Packet]) -> Vec<TestRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut tests: BTreeMap<String, TestRecord> = BTreeMap::new();

    for packet in packets {
        let Some(id) = &packet.test_id else { continue };
        let record = tests.entry(id.clone()).or_insert_with(|| {
            order.push(id.clone());
            TestRecord {
                id: id.clone(),
                ..Default::default()
            }
        });

        if let Some(tags) = &packet.tags {
            record.tags.extend(tags.iter().cloned());
        }
        match packet.status {
            TestStatus::InProgress => record.start = packet.timestamp.or(record.start),
            status if status.is_final() => {
                record.status = Some(status);
                record.stop = packet.timestamp.or(record.stop);
            }
            _ => {}
        }
        if let Some(file) = &packet.file {
            let attachment = record.details.entry(file.name.clone()).or_insert_with(|| Attachment {
                mime_type: None,
                content: Vec::new(),
            });
            if packet.mime_type.is_some() {
                attachment.mime_type = packet.mime_type.clone();
            }
            attachment.content.extend_from_slice(&file.content);
        }
    }

    order.into_iter().filter_map(|id| tests.remove(&id)).collect()
}

fn safe_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Write `records` below `dir`; returns the number of files written.
pub fn write_to_disk(records: &[TestRecord], dir: &Path) -> Result<usize, ReportError> {
    let mut written = 0;
    for record in records {
        let test_dir = dir.join(safe_name(&record.id));
        std::fs::create_dir_all(&test_dir).map_err(ReportError::io(&test_dir))?;

        let envelope = test_dir.join("test.json");
        let body = serde_json::to_vec_pretty(&record.envelope()).map_err(|e| ReportError::Io {
            path: envelope.clone(),
            source: e.into(),
        })?;
        std::fs::write(&envelope, body).map_err(ReportError::io(&envelope))?;
        written += 1;

        for (name, attachment) in &record.details {
            let path = test_dir.join(safe_name(name));
            std::fs::write(&path, &attachment.content).map_err(ReportError::io(&path))?;
            written += 1;
        }
    }
    Ok(written)
}
