//! Command-line surface: argument definitions and command dispatch.

pub mod output;

use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::model::{format_duration, File, Host, Play, Playbook, Record, Task, TaskResult, Timing};
use crate::query::{self, Lookup, PlaybookFilter, Scope};
use crate::recorder::events::Ingestor;
use crate::recorder::Recorder;
use crate::report::{self, html, junit, subunit, ReportScope};
use crate::storage::{self, cascade, format_ts, schema, Pool};

pub use output::{Output, OutputFormat, View};

/// Environment variable overriding the database path.
pub const DATABASE_ENV: &str = "PLAYTRAIL_DATABASE";

#[derive(Parser, Debug)]
#[command(
    name = "playtrail",
    about = "Record playbook runs and report on them",
    version,
    long_about = None
)]
pub struct Cli {
    /// Configuration file (default: $PLAYTRAIL_CONFIG, then ~/.playtrail/playtrail.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database holding the run history
    #[arg(long, global = true, env = DATABASE_ENV)]
    pub database: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Key/value records attached to playbooks
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Hosts targeted by playbooks
    Host {
        #[command(subcommand)]
        action: HostAction,
    },

    /// Plays
    Play {
        #[command(subcommand)]
        action: PlayAction,
    },

    /// Playbook runs
    Playbook {
        #[command(subcommand)]
        action: PlaybookAction,
    },

    /// Per-host task results
    Result {
        #[command(subcommand)]
        action: ResultAction,
    },

    /// Tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Files referenced by playbooks
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Generate a static report
    Generate {
        #[command(subcommand)]
        target: GenerateTarget,
    },

    /// Record a run from newline-delimited JSON events ("-" reads stdin)
    Ingest { file: PathBuf },

    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

/// Scope for entities that belong directly to a playbook.
#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct PlaybookScopeArgs {
    /// List rows of every playbook instead of the latest one
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Only rows of this playbook
    #[arg(short = 'b', long, value_name = "ID")]
    pub playbook: Option<i64>,
}

impl PlaybookScopeArgs {
    pub fn scope(&self) -> Scope {
        match (self.all, self.playbook) {
            (_, Some(id)) => Scope::Playbook(id),
            (true, None) => Scope::All,
            (false, None) => Scope::Latest,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct TaskScopeArgs {
    /// List tasks of every playbook instead of the latest one
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Only tasks of this playbook
    #[arg(short = 'b', long, value_name = "ID")]
    pub playbook: Option<i64>,

    /// Only tasks of this play
    #[arg(long, value_name = "ID")]
    pub play: Option<i64>,
}

impl TaskScopeArgs {
    pub fn scope(&self) -> Scope {
        if let Some(id) = self.play {
            return Scope::Play(id);
        }
        PlaybookScopeArgs {
            all: self.all,
            playbook: self.playbook,
        }
        .scope()
    }
}

#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct ResultScopeArgs {
    /// List results of every playbook instead of the latest one
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Only results of this playbook
    #[arg(short = 'b', long, value_name = "ID")]
    pub playbook: Option<i64>,

    /// Only results of this play
    #[arg(long, value_name = "ID")]
    pub play: Option<i64>,

    /// Only results of this task
    #[arg(long, value_name = "ID")]
    pub task: Option<i64>,

    /// Only results on this host
    #[arg(long, value_name = "ID")]
    pub host: Option<i64>,
}

impl ResultScopeArgs {
    pub fn scope(&self) -> Scope {
        match (self.task, self.host) {
            (Some(id), _) => Scope::Task(id),
            (_, Some(id)) => Scope::Host(id),
            _ => TaskScopeArgs {
                all: self.all,
                playbook: self.playbook,
                play: self.play,
            }
            .scope(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum RecordAction {
    /// List records
    List(PlaybookScopeArgs),
    /// Show a record by id, or by key with --playbook
    Show {
        /// Record id, or key when --playbook is given
        record: String,
        #[arg(short = 'b', long, value_name = "ID")]
        playbook: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum HostAction {
    /// List hosts
    List(PlaybookScopeArgs),
    /// Show a host by id, or by name with --playbook
    Show {
        /// Host id, or name when --playbook is given
        host: String,
        #[arg(short = 'b', long, value_name = "ID")]
        playbook: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlayAction {
    /// List plays
    List(PlaybookScopeArgs),
    /// Show a play
    Show { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum PlaybookAction {
    /// List playbooks
    List {
        /// Only playbooks that ran to completion
        #[arg(long, conflicts_with = "incomplete")]
        complete: bool,
        /// Only playbooks that did not finish
        #[arg(long)]
        incomplete: bool,
    },
    /// Show a playbook
    Show { id: i64 },
    /// Delete a playbook and everything recorded under it
    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ResultAction {
    /// List results
    List(ResultScopeArgs),
    /// Show a result
    Show {
        id: i64,
        /// Include the full result payload
        #[arg(long)]
        long: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskAction {
    /// List tasks
    List(TaskScopeArgs),
    /// Show a task
    Show { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum FileAction {
    /// List files
    List(PlaybookScopeArgs),
    /// Show a file and its content
    Show { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum GenerateTarget {
    /// Static HTML site
    Html {
        /// Directory to write the site into
        destination: PathBuf,
        /// Only this playbook
        #[arg(short = 'b', long, value_name = "ID")]
        playbook: Option<i64>,
    },
    /// JUnit XML file
    Junit {
        /// File to write
        destination: PathBuf,
        /// Only this playbook
        #[arg(short = 'b', long, value_name = "ID")]
        playbook: Option<i64>,
    },
    /// Subunit v2 stream
    Subunit {
        /// File to write
        destination: PathBuf,
        /// Only this playbook
        #[arg(short = 'b', long, value_name = "ID")]
        playbook: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbAction {
    /// Create or upgrade the schema, backfilling durations where needed
    Migrate,
    /// Compute missing durations without touching the schema version
    Backfill,
}

/// Everything a command needs besides its arguments.
pub struct Context {
    pub config: Config,
    pub database: PathBuf,
}

impl Context {
    pub fn new(config: Config, database: Option<PathBuf>) -> Self {
        let database = database.unwrap_or_else(|| config.database.path.clone());
        Self { config, database }
    }

    pub fn pool(&self) -> Result<Pool> {
        storage::open_pool(&self.database)
            .with_context(|| format!("failed to open database {}", self.database.display()))
    }
}

/// Parse-independent entry point used by `main`.
pub fn run(cli: &Cli, config: Config) -> Result<()> {
    let ctx = Context::new(config, cli.database.clone());
    let output = execute(&cli.command, &ctx)?;
    println!("{}", output.render(cli.format));
    Ok(())
}

pub fn execute(command: &Commands, ctx: &Context) -> Result<Output> {
    match command {
        Commands::Record { action } => record(action, ctx),
        Commands::Host { action } => host(action, ctx),
        Commands::Play { action } => play(action, ctx),
        Commands::Playbook { action } => playbook(action, ctx),
        Commands::Result { action } => result(action, ctx),
        Commands::Task { action } => task(action, ctx),
        Commands::File { action } => file(action, ctx),
        Commands::Generate { target } => generate(target, ctx),
        Commands::Ingest { file } => ingest(file, ctx),
        Commands::Db { action } => db(action, ctx),
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

const PLAYBOOK_HEADERS: &[&str] = &["ID", "Path", "Ansible", "Completed", "Started", "Duration"];
const PLAY_HEADERS: &[&str] = &["ID", "Playbook", "Name", "Started", "Duration"];
const TASK_HEADERS: &[&str] = &["ID", "Playbook", "Play", "Name", "Action", "Line", "Duration"];
const RESULT_HEADERS: &[&str] = &["ID", "Task", "Host", "Status", "Changed", "Ignore errors", "Duration"];
const HOST_HEADERS: &[&str] = &["ID", "Playbook", "Name", "Ok", "Changed", "Failed", "Skipped", "Unreachable"];
const FILE_HEADERS: &[&str] = &["ID", "Playbook", "Path"];
const RECORD_HEADERS: &[&str] = &["ID", "Playbook", "Key", "Value", "Type"];

fn duration(timing: &Timing) -> String {
    format_duration(timing.duration())
}

fn timing_fields(timing: &Timing) -> [(&'static str, String); 4] {
    [
        ("Started", format_ts(&timing.started)),
        ("Ended", timing.ended.as_ref().map(format_ts).unwrap_or_default()),
        ("Updated", format_ts(&timing.updated)),
        ("Duration", duration(timing)),
    ]
}

fn playbook_row(p: &Playbook) -> Vec<String> {
    vec![
        p.id.to_string(),
        p.path.clone(),
        p.ansible_version.clone(),
        p.completed.to_string(),
        format_ts(&p.timing.started),
        duration(&p.timing),
    ]
}

fn play_row(p: &Play) -> Vec<String> {
    vec![
        p.id.to_string(),
        p.playbook_id.to_string(),
        p.name.clone(),
        format_ts(&p.timing.started),
        duration(&p.timing),
    ]
}

fn task_row(t: &Task) -> Vec<String> {
    vec![
        t.id.to_string(),
        t.playbook_id.to_string(),
        t.play_id.to_string(),
        t.name.clone(),
        t.action.clone(),
        t.lineno.to_string(),
        duration(&t.timing),
    ]
}

fn result_row(r: &TaskResult) -> Vec<String> {
    vec![
        r.id.to_string(),
        r.task_id.to_string(),
        r.host_id.to_string(),
        r.status.to_string(),
        r.changed.to_string(),
        r.ignore_errors.to_string(),
        duration(&r.timing),
    ]
}

fn host_row(h: &Host) -> Vec<String> {
    vec![
        h.id.to_string(),
        h.playbook_id.to_string(),
        h.name.clone(),
        h.ok.to_string(),
        h.changed.to_string(),
        h.failed.to_string(),
        h.skipped.to_string(),
        h.unreachable.to_string(),
    ]
}

fn file_row(f: &File) -> Vec<String> {
    vec![f.id.to_string(), f.playbook_id.to_string(), f.path.clone()]
}

fn record_row(r: &Record) -> Vec<String> {
    vec![
        r.id.to_string(),
        r.playbook_id.to_string(),
        r.key.clone(),
        r.value.clone(),
        r.kind.clone(),
    ]
}

fn listing<T: serde::Serialize>(headers: &'static [&'static str], items: &[T], row: fn(&T) -> Vec<String>) -> Output {
    Output::table(headers, items.iter().map(row).collect(), &items)
}

/// Id when no playbook is given, otherwise a key within that playbook.
fn lookup(value: &str, playbook: Option<i64>, entity: &str, key: &str) -> Result<Lookup> {
    match playbook {
        Some(playbook) => Ok(Lookup::ByKey {
            playbook,
            key: value.to_string(),
        }),
        None => value
            .parse()
            .map(Lookup::ById)
            .with_context(|| format!("'{value}' is not a {entity} id; pass --playbook to look it up by {key}")),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn record(action: &RecordAction, ctx: &Context) -> Result<Output> {
    let conn = ctx.pool()?.get()?;
    match action {
        RecordAction::List(args) => {
            let records = query::records::list(&conn, args.scope())?;
            Ok(listing(RECORD_HEADERS, &records, record_row))
        }
        RecordAction::Show { record, playbook } => {
            let r = query::records::show(&conn, &lookup(record, *playbook, "record", "key")?)?;
            let fields = vec![
                ("ID", r.id.to_string()),
                ("Playbook", r.playbook_id.to_string()),
                ("Key", r.key.clone()),
                ("Value", r.value.clone()),
                ("Type", r.kind.clone()),
            ];
            Ok(Output::fields(fields, &r))
        }
    }
}

fn host(action: &HostAction, ctx: &Context) -> Result<Output> {
    let conn = ctx.pool()?.get()?;
    match action {
        HostAction::List(args) => {
            let hosts = query::hosts::list(&conn, args.scope())?;
            Ok(listing(HOST_HEADERS, &hosts, host_row))
        }
        HostAction::Show { host, playbook } => {
            let h = query::hosts::show(&conn, &lookup(host, *playbook, "host", "name")?)?;
            let fields = HOST_HEADERS.iter().copied().zip(host_row(&h)).collect();
            Ok(Output::fields(fields, &h))
        }
    }
}

fn play(action: &PlayAction, ctx: &Context) -> Result<Output> {
    let conn = ctx.pool()?.get()?;
    match action {
        PlayAction::List(args) => {
            let plays = query::plays::list(&conn, args.scope())?;
            Ok(listing(PLAY_HEADERS, &plays, play_row))
        }
        PlayAction::Show { id } => {
            let p = query::plays::get(&conn, *id)?;
            let mut fields = vec![
                ("ID", p.id.to_string()),
                ("Playbook", p.playbook_id.to_string()),
                ("Name", p.name.clone()),
            ];
            fields.extend(timing_fields(&p.timing));
            Ok(Output::fields(fields, &p))
        }
    }
}

fn playbook(action: &PlaybookAction, ctx: &Context) -> Result<Output> {
    let mut conn = ctx.pool()?.get()?;
    match action {
        PlaybookAction::List { complete, incomplete } => {
            let filter = match (*complete, *incomplete) {
                (true, _) => PlaybookFilter::Complete,
                (_, true) => PlaybookFilter::Incomplete,
                _ => PlaybookFilter::Any,
            };
            let playbooks = query::playbooks::list(&conn, filter)?;
            Ok(listing(PLAYBOOK_HEADERS, &playbooks, playbook_row))
        }
        PlaybookAction::Show { id } => {
            let p = query::playbooks::get(&conn, *id)?;
            let mut fields = vec![
                ("ID", p.id.to_string()),
                ("Path", p.path.clone()),
                ("Ansible version", p.ansible_version.clone()),
                ("Completed", p.completed.to_string()),
                ("Parameters", p.parameters.to_string()),
            ];
            fields.extend(timing_fields(&p.timing));
            Ok(Output::fields(fields, &p))
        }
        PlaybookAction::Delete { id } => {
            let summary = cascade::delete_playbook(&mut conn, *id)?;
            Ok(Output::message(
                format!("Playbook {id} deleted ({} rows removed)", summary.total()),
                &summary,
            ))
        }
    }
}

fn result(action: &ResultAction, ctx: &Context) -> Result<Output> {
    let conn = ctx.pool()?.get()?;
    match action {
        ResultAction::List(args) => {
            let results = query::results::list(&conn, args.scope())?;
            Ok(listing(RESULT_HEADERS, &results, result_row))
        }
        ResultAction::Show { id, long } => {
            let r = query::results::get(&conn, *id)?;
            let mut fields = vec![
                ("ID", r.id.to_string()),
                ("Playbook", r.playbook_id.to_string()),
                ("Task", r.task_id.to_string()),
                ("Host", r.host_id.to_string()),
                ("Status", r.status.to_string()),
                ("Changed", r.changed.to_string()),
                ("Ignore errors", r.ignore_errors.to_string()),
            ];
            fields.extend(timing_fields(&r.timing));

            // The payload goes last, in both views, and only with --long.
            let mut data = serde_json::to_value(&r)?;
            if let Value::Object(map) = &mut data {
                let mut ordered: serde_json::Map<String, Value> =
                    std::mem::take(map).into_iter().filter(|(key, _)| key != "result").collect();
                if *long {
                    ordered.insert("result".to_string(), r.result.clone());
                }
                *map = ordered;
            }
            if *long {
                fields.push(("Result", serde_json::to_string(&r.result)?));
            }
            Ok(Output {
                view: View::Fields(fields),
                data,
            })
        }
    }
}

fn task(action: &TaskAction, ctx: &Context) -> Result<Output> {
    let conn = ctx.pool()?.get()?;
    match action {
        TaskAction::List(args) => {
            let tasks = query::tasks::list(&conn, args.scope())?;
            Ok(listing(TASK_HEADERS, &tasks, task_row))
        }
        TaskAction::Show { id } => {
            let t = query::tasks::get(&conn, *id)?;
            let mut fields = vec![
                ("ID", t.id.to_string()),
                ("Playbook", t.playbook_id.to_string()),
                ("Play", t.play_id.to_string()),
                ("File", t.file_id.to_string()),
                ("Name", t.name.clone()),
                ("Action", t.action.clone()),
                ("Line", t.lineno.to_string()),
                ("Tags", t.tags.join(", ")),
                ("Handler", t.handler.to_string()),
            ];
            fields.extend(timing_fields(&t.timing));
            Ok(Output::fields(fields, &t))
        }
    }
}

fn file(action: &FileAction, ctx: &Context) -> Result<Output> {
    let conn = ctx.pool()?.get()?;
    match action {
        FileAction::List(args) => {
            let files = query::files::list(&conn, args.scope())?;
            Ok(listing(FILE_HEADERS, &files, file_row))
        }
        FileAction::Show { id } => {
            let f = query::files::get(&conn, *id)?;
            let fields = vec![
                ("ID", f.id.to_string()),
                ("Playbook", f.playbook_id.to_string()),
                ("Path", f.path.clone()),
                ("Content", f.content.clone()),
            ];
            Ok(Output::fields(fields, &f))
        }
    }
}

fn generate(target: &GenerateTarget, ctx: &Context) -> Result<Output> {
    let (destination, playbook) = match target {
        GenerateTarget::Html { destination, playbook }
        | GenerateTarget::Junit { destination, playbook }
        | GenerateTarget::Subunit { destination, playbook } => (destination.as_path(), *playbook),
    };
    let conn = ctx.pool()?.get()?;
    let data = report::resolve(&conn, ReportScope::from(playbook))?;

    match target {
        GenerateTarget::Html { .. } => {
            let summary = html::generate(&data, destination, ctx.config.report.ignore_empty_generation)
                .with_context(|| format!("failed to generate html report in {}", destination.display()))?;
            let mut text = format!("Generated {} pages in {}", summary.pages, destination.display());
            for warning in &summary.warnings {
                text.push_str(&format!("\nwarning: {warning}"));
            }
            Ok(Output::message(text, &summary))
        }
        GenerateTarget::Junit { .. } => {
            let summary = junit::write(&data, destination)
                .with_context(|| format!("failed to generate junit report {}", destination.display()))?;
            Ok(Output::message(
                format!(
                    "Wrote {} ({} tests, {} failures)",
                    destination.display(),
                    summary.tests,
                    summary.failures
                ),
                &summary,
            ))
        }
        GenerateTarget::Subunit { .. } => {
            let summary = subunit::write(&data, destination)
                .with_context(|| format!("failed to generate subunit stream {}", destination.display()))?;
            Ok(Output::message(
                format!("Wrote {} ({} tests)", destination.display(), summary.tests),
                &summary,
            ))
        }
    }
}

fn ingest(file: &Path, ctx: &Context) -> Result<Output> {
    let ingestor = Ingestor::new(Recorder::new(ctx.pool()?));
    let summary = if file == Path::new("-") {
        ingestor.ingest(std::io::stdin().lock())?
    } else {
        let reader = std::fs::File::open(file).with_context(|| format!("failed to open {}", file.display()))?;
        ingestor
            .ingest(BufReader::new(reader))
            .with_context(|| format!("failed to ingest {}", file.display()))?
    };
    info!(events = summary.events, "events ingested");
    Ok(Output::message(
        format!(
            "Recorded {} events ({} playbooks, {} results)",
            summary.events,
            summary.playbooks.len(),
            summary.results
        ),
        &summary,
    ))
}

fn db(action: &DbAction, ctx: &Context) -> Result<Output> {
    match action {
        DbAction::Migrate => {
            let (pool, outcome) = storage::open_pool_migrated(&ctx.database)
                .with_context(|| format!("failed to migrate {}", ctx.database.display()))?;
            let conn = pool.get()?;
            let version = schema::current_version(&conn)?;
            let mut text = if outcome.applied.is_empty() {
                format!("Schema already at version {version}")
            } else {
                format!("Schema upgraded to version {version}")
            };
            if let Some(backfill) = &outcome.backfill {
                text.push_str(&format!(
                    "\nBackfilled {} durations ({} rows skipped)",
                    backfill.total_updated(),
                    backfill.total_skipped()
                ));
            }
            Ok(Output::message(text, &outcome))
        }
        DbAction::Backfill => {
            let mut conn = ctx.pool()?.get()?;
            let report = storage::backfill::backfill_durations(&mut conn)?;
            let rows = report
                .tables
                .iter()
                .map(|t| {
                    vec![
                        t.table.to_string(),
                        t.updated.to_string(),
                        t.untouched.to_string(),
                        t.skipped.to_string(),
                    ]
                })
                .collect();
            Ok(Output::table(&["Table", "Updated", "Untouched", "Skipped"], rows, &report))
        }
    }
}
