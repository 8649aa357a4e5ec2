//! Static HTML site.
//!
//! Layout of the destination directory:
//!
//! ```text
//! index.html                 playbook list
//! static/playtrail.css
//! <kind>/index.html          one listing per entity kind
//! <kind>/<id>/index.html     one detail page per in-scope row
//! reports/index.html         per-playbook status totals
//! ```
//!
//! Rendering is pure ([`render_site`]); [`write_site`] only touches the disk.

use std::path::{Path, PathBuf};

use askama::Template;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{GenerateWarning, PlaybookReport, ReportData, ReportError};
use crate::model::{format_duration, File, Host, Play, Record, Task, TaskResult, Timing};

const STYLESHEET: &str = include_str!("../../assets/playtrail.css");

pub const KINDS: [&str; 7] = ["playbook", "play", "task", "result", "host", "file", "record"];

/// A rendered page and its path relative to the destination.
#[derive(Debug, Clone)]
pub struct Page {
    pub path: PathBuf,
    pub body: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteSummary {
    pub destination: PathBuf,
    pub pages: usize,
    pub warnings: Vec<GenerateWarning>,
}

// ---------------------------------------------------------------------------
// View models
// ---------------------------------------------------------------------------

struct Field {
    name: &'static str,
    value: String,
    href: String,
    pre: bool,
}

impl Field {
    fn text(name: &'static str, value: impl ToString) -> Self {
        Self {
            name,
            value: value.to_string(),
            href: String::new(),
            pre: false,
        }
    }

    fn link(name: &'static str, value: impl ToString, href: String) -> Self {
        Self {
            href,
            ..Self::text(name, value)
        }
    }

    fn pre(name: &'static str, value: impl ToString) -> Self {
        Self {
            pre: true,
            ..Self::text(name, value)
        }
    }
}

struct ListingRow {
    href: String,
    class: &'static str,
    cells: Vec<String>,
}

struct Section {
    title: &'static str,
    headers: &'static [&'static str],
    rows: Vec<ListingRow>,
}

#[derive(Template)]
#[template(path = "page.html")]
struct PageTemplate<'a> {
    root: &'static str,
    title: String,
    notice: &'a str,
    fields: Vec<Field>,
    sections: Vec<Section>,
    version: &'static str,
    generated: &'a str,
}

const PLAYBOOK_HEADERS: &[&str] = &["ID", "Path", "Ansible", "Status", "Started", "Duration"];
const PLAY_HEADERS: &[&str] = &["ID", "Name", "Playbook", "Started", "Duration"];
const TASK_HEADERS: &[&str] = &["ID", "Name", "Action", "Location", "Started", "Duration"];
const RESULT_HEADERS: &[&str] = &["ID", "Host", "Task", "Status", "Started", "Duration"];
const HOST_HEADERS: &[&str] = &["ID", "Name", "Ok", "Changed", "Failed", "Skipped", "Unreachable"];
const FILE_HEADERS: &[&str] = &["ID", "Path"];
const RECORD_HEADERS: &[&str] = &["ID", "Key", "Value", "Type"];
const REPORT_HEADERS: &[&str] = &[
    "Playbook", "Status", "Hosts", "Ok", "Changed", "Failed", "Skipped", "Unreachable",
];

fn detail_href(kind: &str, id: i64) -> String {
    format!("{kind}/{id}/index.html")
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn ended(timing: &Timing) -> String {
    timing.ended.as_ref().map_or_else(|| "-".to_string(), timestamp)
}

fn playbook_status(report: &PlaybookReport) -> &'static str {
    if report.results.iter().any(|r| r.status.is_failure() && !r.ignore_errors) {
        "failed"
    } else if report.playbook.completed {
        "completed"
    } else {
        "incomplete"
    }
}

fn playbook_row(report: &PlaybookReport) -> ListingRow {
    let p = &report.playbook;
    let status = playbook_status(report);
    ListingRow {
        href: detail_href("playbook", p.id),
        class: if status == "failed" { "failed" } else { "" },
        cells: vec![
            p.id.to_string(),
            p.path.clone(),
            p.ansible_version.clone(),
            status.to_string(),
            timestamp(&p.timing.started),
            format_duration(p.timing.duration()),
        ],
    }
}

fn play_row(report: &PlaybookReport, play: &Play) -> ListingRow {
    ListingRow {
        href: detail_href("play", play.id),
        class: "",
        cells: vec![
            play.id.to_string(),
            if play.name.is_empty() { "(unnamed)".to_string() } else { play.name.clone() },
            report.playbook.path.clone(),
            timestamp(&play.timing.started),
            format_duration(play.timing.duration()),
        ],
    }
}

fn task_location(report: &PlaybookReport, task: &Task) -> String {
    let path = report.file(task.file_id).map_or("?", |f| f.path.as_str());
    format!("{path}:{}", task.lineno)
}

fn task_row(report: &PlaybookReport, task: &Task) -> ListingRow {
    ListingRow {
        href: detail_href("task", task.id),
        class: "",
        cells: vec![
            task.id.to_string(),
            task.display_name().to_string(),
            task.action.clone(),
            task_location(report, task),
            timestamp(&task.timing.started),
            format_duration(task.timing.duration()),
        ],
    }
}

fn result_row(report: &PlaybookReport, result: &TaskResult) -> ListingRow {
    let host = report.host(result.host_id).map_or("?", |h| h.name.as_str());
    let task = report.task(result.task_id).map_or("?", |t| t.display_name());
    ListingRow {
        href: detail_href("result", result.id),
        class: result.status.as_str(),
        cells: vec![
            result.id.to_string(),
            host.to_string(),
            task.to_string(),
            result.status.to_string(),
            timestamp(&result.timing.started),
            format_duration(result.timing.duration()),
        ],
    }
}

fn host_row(host: &Host) -> ListingRow {
    ListingRow {
        href: detail_href("host", host.id),
        class: if host.failed + host.unreachable > 0 { "failed" } else { "" },
        cells: vec![
            host.id.to_string(),
            host.name.clone(),
            host.ok.to_string(),
            host.changed.to_string(),
            host.failed.to_string(),
            host.skipped.to_string(),
            host.unreachable.to_string(),
        ],
    }
}

fn file_row(file: &File) -> ListingRow {
    ListingRow {
        href: detail_href("file", file.id),
        class: "",
        cells: vec![file.id.to_string(), file.path.clone()],
    }
}

fn record_row(record: &Record) -> ListingRow {
    ListingRow {
        href: detail_href("record", record.id),
        class: "",
        cells: vec![
            record.id.to_string(),
            record.key.clone(),
            record.value.clone(),
            record.kind.clone(),
        ],
    }
}

fn report_row(report: &PlaybookReport) -> ListingRow {
    let sum = |count: fn(&Host) -> i64| report.hosts.iter().map(count).sum::<i64>().to_string();
    ListingRow {
        href: detail_href("playbook", report.playbook.id),
        class: "",
        cells: vec![
            report.playbook.path.clone(),
            playbook_status(report).to_string(),
            report.hosts.len().to_string(),
            sum(|h| h.ok),
            sum(|h| h.changed),
            sum(|h| h.failed),
            sum(|h| h.skipped),
            sum(|h| h.unreachable),
        ],
    }
}

fn timing_fields(timing: &Timing) -> [Field; 3] {
    [
        Field::text("Started", timestamp(&timing.started)),
        Field::text("Ended", ended(timing)),
        Field::text("Duration", format_duration(timing.duration())),
    ]
}

fn pretty_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

struct SiteBuilder<'a> {
    generated: String,
    notice: &'a str,
    pages: Vec<Page>,
}

impl SiteBuilder<'_> {
    fn page(
        &mut self,
        path: PathBuf,
        root: &'static str,
        title: String,
        fields: Vec<Field>,
        sections: Vec<Section>,
    ) -> Result<(), ReportError> {
        let body = PageTemplate {
            root,
            title,
            notice: self.notice,
            fields,
            sections,
            version: env!("CARGO_PKG_VERSION"),
            generated: &self.generated,
        }
        .render()?;
        self.pages.push(Page { path, body });
        Ok(())
    }

    fn listing(&mut self, kind: &str, title: &str, headers: &'static [&'static str], rows: Vec<ListingRow>) -> Result<(), ReportError> {
        let section = Section {
            title: "",
            headers,
            rows,
        };
        self.page(Path::new(kind).join("index.html"), "../", title.to_string(), Vec::new(), vec![section])
    }

    fn detail(&mut self, kind: &str, id: i64, title: String, fields: Vec<Field>, sections: Vec<Section>) -> Result<(), ReportError> {
        let path = Path::new(kind).join(id.to_string()).join("index.html");
        self.page(path, "../../", title, fields, sections)
    }
}

/// Render every page of the site for `data`.
pub fn render_site(data: &ReportData, generated: DateTime<Utc>) -> Result<Vec<Page>, ReportError> {
    let notice = if data.is_empty() { "No playbook has been recorded in this scope." } else { "" };
    let mut site = SiteBuilder {
        generated: timestamp(&generated),
        notice,
        pages: Vec::new(),
    };

    let each = |f: fn(&PlaybookReport) -> Vec<ListingRow>| data.playbooks.iter().flat_map(f).collect::<Vec<_>>();
    let playbooks = || data.playbooks.iter().map(playbook_row).collect::<Vec<_>>();

    site.page(
        PathBuf::from("index.html"),
        "",
        "Playbooks".to_string(),
        Vec::new(),
        vec![Section {
            title: "",
            headers: PLAYBOOK_HEADERS,
            rows: playbooks(),
        }],
    )?;
    site.listing("playbook", "Playbooks", PLAYBOOK_HEADERS, playbooks())?;
    site.listing("play", "Plays", PLAY_HEADERS, each(|r| r.plays.iter().map(|p| play_row(r, p)).collect()))?;
    site.listing("task", "Tasks", TASK_HEADERS, each(|r| r.tasks.iter().map(|t| task_row(r, t)).collect()))?;
    site.listing("result", "Results", RESULT_HEADERS, each(|r| r.results.iter().map(|x| result_row(r, x)).collect()))?;
    site.listing("host", "Hosts", HOST_HEADERS, each(|r| r.hosts.iter().map(host_row).collect()))?;
    site.listing("file", "Files", FILE_HEADERS, each(|r| r.files.iter().map(file_row).collect()))?;
    site.listing("record", "Records", RECORD_HEADERS, each(|r| r.records.iter().map(record_row).collect()))?;
    site.listing("reports", "Reports", REPORT_HEADERS, data.playbooks.iter().map(report_row).collect())?;

    for report in &data.playbooks {
        render_playbook(&mut site, report)?;
    }

    Ok(site.pages)
}

fn render_playbook(site: &mut SiteBuilder<'_>, report: &PlaybookReport) -> Result<(), ReportError> {
    let p = &report.playbook;
    let mut fields = vec![
        Field::text("Path", &p.path),
        Field::text("Ansible version", &p.ansible_version),
        Field::text("Status", playbook_status(report)),
    ];
    fields.extend(timing_fields(&p.timing));
    fields.push(Field::pre("Parameters", pretty_json(&p.parameters)));
    site.detail(
        "playbook",
        p.id,
        format!("Playbook {}", p.path),
        fields,
        vec![
            Section {
                title: "Plays",
                headers: PLAY_HEADERS,
                rows: report.plays.iter().map(|x| play_row(report, x)).collect(),
            },
            Section {
                title: "Hosts",
                headers: HOST_HEADERS,
                rows: report.hosts.iter().map(host_row).collect(),
            },
            Section {
                title: "Files",
                headers: FILE_HEADERS,
                rows: report.files.iter().map(file_row).collect(),
            },
            Section {
                title: "Records",
                headers: RECORD_HEADERS,
                rows: report.records.iter().map(record_row).collect(),
            },
        ],
    )?;

    let playbook_link = || Field::link("Playbook", &p.path, detail_href("playbook", p.id));

    for play in &report.plays {
        let mut fields = vec![playbook_link(), Field::text("Name", &play.name)];
        fields.extend(timing_fields(&play.timing));
        let tasks = report
            .tasks
            .iter()
            .filter(|t| t.play_id == play.id)
            .map(|t| task_row(report, t))
            .collect();
        site.detail(
            "play",
            play.id,
            format!("Play {}", play.name),
            fields,
            vec![Section {
                title: "Tasks",
                headers: TASK_HEADERS,
                rows: tasks,
            }],
        )?;
    }

    for task in &report.tasks {
        let mut fields = vec![playbook_link()];
        if let Some(play) = report.play(task.play_id) {
            fields.push(Field::link("Play", &play.name, detail_href("play", play.id)));
        }
        fields.push(Field::text("Action", &task.action));
        fields.push(Field::link("Location", task_location(report, task), detail_href("file", task.file_id)));
        fields.push(Field::text("Tags", task.tags.join(", ")));
        fields.push(Field::text("Handler", task.handler));
        fields.extend(timing_fields(&task.timing));
        site.detail(
            "task",
            task.id,
            format!("Task {}", task.display_name()),
            fields,
            vec![Section {
                title: "Results",
                headers: RESULT_HEADERS,
                rows: report.task_results(task.id).map(|r| result_row(report, r)).collect(),
            }],
        )?;
    }

    for result in &report.results {
        let mut fields = vec![playbook_link()];
        if let Some(task) = report.task(result.task_id) {
            fields.push(Field::link("Task", task.display_name(), detail_href("task", task.id)));
        }
        if let Some(host) = report.host(result.host_id) {
            fields.push(Field::link("Host", &host.name, detail_href("host", host.id)));
        }
        fields.push(Field::text("Status", result.status));
        fields.push(Field::text("Changed", result.changed));
        fields.push(Field::text("Ignore errors", result.ignore_errors));
        fields.extend(timing_fields(&result.timing));
        fields.push(Field::pre("Result", pretty_json(&result.result)));
        site.detail("result", result.id, format!("Result {}", result.id), fields, Vec::new())?;
    }

    for host in &report.hosts {
        let fields = vec![
            playbook_link(),
            Field::text("Ok", host.ok),
            Field::text("Changed", host.changed),
            Field::text("Failed", host.failed),
            Field::text("Skipped", host.skipped),
            Field::text("Unreachable", host.unreachable),
        ];
        let results = report
            .results
            .iter()
            .filter(|r| r.host_id == host.id)
            .map(|r| result_row(report, r))
            .collect();
        site.detail(
            "host",
            host.id,
            format!("Host {}", host.name),
            fields,
            vec![Section {
                title: "Results",
                headers: RESULT_HEADERS,
                rows: results,
            }],
        )?;
    }

    for file in &report.files {
        let fields = vec![playbook_link(), Field::pre("Content", &file.content)];
        site.detail("file", file.id, format!("File {}", file.path), fields, Vec::new())?;
    }

    for record in &report.records {
        let fields = vec![
            playbook_link(),
            Field::text("Key", &record.key),
            Field::text("Type", &record.kind),
            Field::pre("Value", &record.value),
        ];
        site.detail("record", record.id, format!("Record {}", record.key), fields, Vec::new())?;
    }

    Ok(())
}

/// Write rendered pages and the stylesheet below `dest`.
pub fn write_site(pages: &[Page], dest: &Path) -> Result<(), ReportError> {
    let static_dir = dest.join("static");
    std::fs::create_dir_all(&static_dir).map_err(ReportError::io(&static_dir))?;
    let css = static_dir.join("playtrail.css");
    std::fs::write(&css, STYLESHEET).map_err(ReportError::io(&css))?;

    for page in pages {
        let path = dest.join(&page.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ReportError::io(parent))?;
        }
        std::fs::write(&path, &page.body).map_err(ReportError::io(&path))?;
    }
    Ok(())
}

/// Render and write the site for `data` into `dest`.
pub fn generate(data: &ReportData, dest: &Path, ignore_empty: bool) -> Result<SiteSummary, ReportError> {
    let mut warnings = Vec::new();
    if data.is_empty() && !ignore_empty {
        warn!(dest = %dest.display(), "{}", GenerateWarning::EmptyScope);
        warnings.push(GenerateWarning::EmptyScope);
    }

    let pages = render_site(data, Utc::now())?;
    write_site(&pages, dest)?;
    info!(dest = %dest.display(), pages = pages.len(), "html report written");

    Ok(SiteSummary {
        destination: dest.to_path_buf(),
        pages: pages.len(),
        warnings,
    })
}
