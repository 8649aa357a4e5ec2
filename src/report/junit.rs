//! JUnit XML: one `testcase` per task, one `failure` per failed host.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{PlaybookReport, ReportData, ReportError};
use crate::model::{ResultStatus, Task, TaskResult};

pub const SUITE_NAME: &str = "Ansible Tasks";

/// Tasks whose failures are the point of the task.
const EXPECTED_FAILURE: &str = "EXPECTED FAILURE";
/// Tasks whose failed/ok outcome is reported inverted.
const TOGGLE_RESULT: &str = "TOGGLE RESULT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JunitSummary {
    pub tests: usize,
    pub failures: usize,
    pub skipped: usize,
}

/// Whether `result` of `task` counts as a JUnit failure.
fn is_failure(task: &Task, result: &TaskResult) -> bool {
    if task.name.contains(EXPECTED_FAILURE) {
        return false;
    }
    let failing = result.status.is_failure() && !result.ignore_errors;
    if task.name.contains(TOGGLE_RESULT) {
        return match result.status {
            ResultStatus::Failed => false,
            ResultStatus::Ok | ResultStatus::Changed => true,
            _ => failing,
        };
    }
    failing
}

/// Characters XML 1.0 cannot carry at all, escaped or not.
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{d7ff}' | '\u{e000}'..='\u{fffd}' | '\u{10000}'..='\u{10ffff}')
}

/// Escape markup and drop characters XML forbids (ANSI colour codes in
/// module output, mostly).
fn escape_xml(s: &str) -> String {
    s.chars()
        .filter(|c| is_xml_char(*c))
        .collect::<String>()
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn seconds(d: chrono::Duration) -> String {
    format!("{:.6}", d.num_microseconds().unwrap_or_default() as f64 / 1_000_000.0)
}

struct Case {
    xml: String,
    failures: usize,
    skipped: bool,
    time: chrono::Duration,
}

fn testcase(report: &PlaybookReport, task: &Task) -> Case {
    let play = report.play(task.play_id).map_or("", |p| p.name.as_str());
    let classname = format!("{}.{}", report.playbook.path, play);
    let results: Vec<&TaskResult> = report.task_results(task.id).collect();
    let time = task.timing.duration();

    let mut body = String::new();
    let mut failures = 0;
    for result in &results {
        if !is_failure(task, result) {
            continue;
        }
        failures += 1;
        let host = report.host(result.host_id).map_or("?", |h| h.name.as_str());
        let message = result
            .result
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or(result.status.as_str());
        let _ = writeln!(
            body,
            r#"      <failure type="{}" message="{}">{}</failure>"#,
            result.status,
            escape_xml(&format!("{host}: {message}")),
            escape_xml(&result.result.to_string())
        );
    }

    let skipped = !results.is_empty() && results.iter().all(|r| r.status == ResultStatus::Skipped);
    if skipped {
        body.push_str("      <skipped/>\n");
    }

    let hosts: serde_json::Map<String, serde_json::Value> = results
        .iter()
        .map(|r| {
            let host = report.host(r.host_id).map_or_else(|| r.host_id.to_string(), |h| h.name.clone());
            (host, json!(r.status))
        })
        .collect();
    let _ = writeln!(
        body,
        "      <system-out>{}</system-out>",
        escape_xml(&json!({ "task_id": task.id, "hosts": hosts }).to_string())
    );

    let xml = format!(
        "    <testcase name=\"{}\" classname=\"{}\" time=\"{}\">\n{body}    </testcase>\n",
        escape_xml(task.display_name()),
        escape_xml(&classname),
        seconds(time),
    );
    Case {
        xml,
        failures,
        skipped,
        time,
    }
}

/// Render the whole document.
pub fn render(data: &ReportData) -> (String, JunitSummary) {
    let mut summary = JunitSummary::default();
    let mut cases = String::new();
    let mut total = chrono::Duration::zero();

    for report in &data.playbooks {
        for task in &report.tasks {
            let case = testcase(report, task);
            summary.tests += 1;
            summary.failures += case.failures;
            summary.skipped += usize::from(case.skipped);
            total = total + case.time;
            cases.push_str(&case.xml);
        }
    }

    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    let _ = writeln!(
        xml,
        r#"<testsuites tests="{}" failures="{}" time="{}">"#,
        summary.tests,
        summary.failures,
        seconds(total)
    );
    let _ = writeln!(
        xml,
        r#"  <testsuite name="{SUITE_NAME}" tests="{}" failures="{}" skipped="{}" time="{}">"#,
        summary.tests,
        summary.failures,
        summary.skipped,
        seconds(total)
    );
    xml.push_str(&cases);
    xml.push_str("  </testsuite>\n</testsuites>\n");
    (xml, summary)
}

pub fn write(data: &ReportData, path: &Path) -> Result<JunitSummary, ReportError> {
    let (xml, summary) = render(data);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(ReportError::io(parent))?;
    }
    std::fs::write(path, xml).map_err(ReportError::io(path))?;
    info!(path = %path.display(), tests = summary.tests, failures = summary.failures, "junit report written");
    Ok(summary)
}
