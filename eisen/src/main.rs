//! `eisen`: urgency/importance task matrix on the command line.
//!
//! Tasks are stored in a local JSON file, or in a remote document store
//! when an actor id and store URL are configured. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/eisen/config.toml`).
//!
//! ```bash
//! # Local file
//! cargo run --bin eisen -- add "Write report" --priority 1 --tag important
//! cargo run --bin eisen -- list
//!
//! # Remote store
//! cargo run --bin eisen -- --actor-id alice --store-url ws://127.0.0.1:9100/ws list
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use eisen::backend::memory::MemoryBackend;
use eisen::backend::{Backend, BackendError};
use eisen::clock::SystemClock;
use eisen::config::{CliArgs, ConfigError, EisenConfig};
use eisen::identity::{self, Identity, IdentityProvider, StaticIdentity};
use eisen::matrix::{Quadrant, UnknownQuadrant};
use eisen::sync::{PersistOutcome, SyncCoordinator, TaskDraft, TaskError, TaskPatch};
use eisen_proto::history::HistoryEntry;
use eisen_proto::task::{Schedule, Task, TaskId};

type Engine = SyncCoordinator<Backend, SystemClock>;

#[derive(Parser, Debug)]
#[command(version, about = "Urgency/importance task matrix")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show tasks grouped by quadrant.
    List,
    /// Add a task.
    Add {
        /// Task title.
        title: String,
        /// Longer description.
        #[arg(short, long, default_value = "")]
        description: String,
        /// Priority, 1 (most urgent) to 5.
        #[arg(short, long)]
        priority: Option<u8>,
        /// Tag; repeat for several. `important` marks the task important.
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Schedule for tomorrow (backlog).
        #[arg(long)]
        tomorrow: bool,
    },
    /// Edit fields of a task.
    Edit {
        /// Task id, or its short form from `list`.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New description.
        #[arg(short, long)]
        description: Option<String>,
        /// New priority.
        #[arg(short, long)]
        priority: Option<u8>,
        /// Replace tags; repeat for several.
        #[arg(short, long = "tag")]
        tags: Option<Vec<String>>,
    },
    /// Move a task into a quadrant (do, schedule, delegate, eliminate, backlog).
    Move {
        /// Task id, or its short form from `list`.
        id: String,
        /// Target quadrant.
        quadrant: String,
    },
    /// Reorder tasks; the listed tasks swap into each other's positions.
    Reorder {
        /// Task ids or short ids, in the new order.
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Toggle a task between done and to-do.
    Done {
        /// Task id, or its short form from `list`.
        id: String,
    },
    /// Delete a task.
    Rm {
        /// Task id, or its short form from `list`.
        id: String,
    },
    /// Show the change history, newest first.
    History {
        /// Only this task.
        id: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Quadrant(#[from] UnknownQuadrant),
    #[error("no task matches '{0}'")]
    UnknownTask(String),
    #[error("'{0}' matches more than one task")]
    AmbiguousTask(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EisenConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e @ ConfigError::ReadFile { .. }) if cli.args.config.is_some() => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            EisenConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.args.log_level, cli.args.log_file.as_deref());
    tracing::info!("eisen starting");

    let engine = match open_engine(&cli.args, &config).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&engine, &config, cli.command.unwrap_or(Command::List)).await;
    tracing::info!("eisen exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Logs go to a file so they never mix with command output. Returns a
/// [`WorkerGuard`] that must be held until shutdown to flush buffered
/// entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("eisen.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Picks the backend and loads the task list.
async fn open_engine(cli: &CliArgs, config: &EisenConfig) -> Result<Arc<Engine>, CliError> {
    let provider = StaticIdentity::from_config(config.actor_id.as_deref());
    let (identity, backend) = if cli.ephemeral {
        let identity = provider.resolve().unwrap_or_else(Identity::local);
        (identity, Backend::Memory(MemoryBackend::new()))
    } else {
        identity::bootstrap(&provider, &config.bootstrap_config()).await?
    };

    let engine = Arc::new(SyncCoordinator::new(
        backend,
        SystemClock,
        identity.actor_id,
        config.sync_config(),
    ));
    engine.load().await?;
    Ok(engine)
}

async fn run(engine: &Arc<Engine>, config: &EisenConfig, command: Command) -> Result<(), CliError> {
    match command {
        Command::List => print_matrix(engine),
        Command::Add {
            title,
            description,
            priority,
            tags,
            tomorrow,
        } => {
            let draft = TaskDraft {
                title,
                description,
                priority,
                tags,
                scheduled_for: tomorrow.then_some(Schedule::Tomorrow),
                due_date: None,
            };
            let (task, outcome) = engine.create_task(draft)?.settled().await;
            report("added", &task, outcome);
        }
        Command::Edit {
            id,
            title,
            description,
            priority,
            tags,
        } => {
            let id = resolve_id(engine, &id)?;
            let patch = TaskPatch {
                title,
                description,
                priority,
                tags,
                ..TaskPatch::default()
            };
            let (task, outcome) = engine.update_task(&id, patch)?.settled().await;
            report("updated", &task, outcome);
        }
        Command::Move { id, quadrant } => {
            let id = resolve_id(engine, &id)?;
            let target: Quadrant = quadrant.parse()?;
            let (task, outcome) = engine.move_task(&id, target)?.settled().await;
            report(&format!("moved to {}", target.title()), &task, outcome);
        }
        Command::Reorder { ids } => {
            let ids = ids
                .iter()
                .map(|raw| resolve_id(engine, raw))
                .collect::<Result<Vec<_>, _>>()?;
            let (_, outcome) = engine.reorder(&ids)?.settled().await;
            if outcome == PersistOutcome::Failed {
                eprintln!("warning: new order could not be saved");
            }
            print_matrix(engine);
        }
        Command::Done { id } => {
            let id = resolve_id(engine, &id)?;
            let (task, outcome) = engine.toggle_complete(&id)?.settled().await;
            let verb = if task.is_completed() { "completed" } else { "reopened" };
            report(verb, &task, outcome);
        }
        Command::Rm { id } => {
            let id = resolve_id(engine, &id)?;
            let (task, outcome) = engine.delete_task(&id)?.settled().await;
            report("deleted", &task, outcome);
        }
        Command::History { id } => {
            let id = id.map(|raw| resolve_id(engine, &raw)).transpose()?;
            for entry in engine.get_history(id.as_ref()).await? {
                print_history_entry(&entry, &config.timestamp_format);
            }
        }
    }
    Ok(())
}

/// Finds a task by full id or by the short id shown in listings.
fn resolve_id(engine: &Engine, raw: &str) -> Result<TaskId, CliError> {
    let tasks = engine.tasks();
    if let Some(task) = tasks.iter().find(|t| t.id.as_str() == raw) {
        return Ok(task.id.clone());
    }
    let mut matches = tasks.iter().filter(|t| !raw.is_empty() && t.id.as_str().ends_with(raw));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id.clone()),
        (None, _) => Err(CliError::UnknownTask(raw.to_string())),
        (Some(_), Some(_)) => Err(CliError::AmbiguousTask(raw.to_string())),
    }
}

fn report(verb: &str, task: &Task, outcome: PersistOutcome) {
    println!("{verb}: {}", format_task(task));
    if outcome == PersistOutcome::Failed {
        eprintln!("warning: change could not be saved");
    }
}

fn print_matrix(engine: &Engine) {
    for (quadrant, tasks) in engine.list_by_quadrant() {
        println!("{} ({})", quadrant.title(), tasks.len());
        for task in &tasks {
            println!("  {}", format_task(task));
        }
    }
}

fn format_task(task: &Task) -> String {
    let mark = if task.is_completed() { 'x' } else { ' ' };
    let mut line = format!("[{mark}] {}  {}  p{}", short_id(&task.id), task.title, task.priority);
    for tag in &task.tags {
        line.push_str(" #");
        line.push_str(tag);
    }
    line
}

/// Last eight characters of an id; the leading part of a v7 id is a
/// timestamp shared by tasks created close together.
fn short_id(id: &TaskId) -> String {
    let chars: Vec<char> = id.as_str().chars().collect();
    chars[chars.len().saturating_sub(8)..].iter().collect()
}

fn print_history_entry(entry: &HistoryEntry, format: &str) {
    println!(
        "{}  {:<8} {}",
        format_timestamp_ms(entry.timestamp, format),
        entry.action.as_str(),
        entry.ticket_data.title
    );
    for change in entry.changes.iter().flatten() {
        println!("    {}: {} -> {}", change.field, change.old_value, change.new_value);
    }
}

/// Format an epoch-millisecond timestamp in local time.
fn format_timestamp_ms(ms: u64, format: &str) -> String {
    use chrono::{Local, TimeZone};
    let secs = i64::try_from(ms / 1000).unwrap_or(i64::MAX);
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => dt.format(format).to_string(),
        _ => "????-??-?? ??:??".to_string(),
    }
}
