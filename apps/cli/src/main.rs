//! Mimic CLI - command-line interface for the desktop workflow learning and
//! replay engine.
//!
//! Subcommands: `learn` (extract workflows from captures), `list`, `run`
//! (goal-driven execution), `play` (direct replay), `watch` (continuous
//! learning daemon), `report` (reproducibility report + parts catalog), and
//! `stats` (cross-session analysis).

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Mimic - desktop workflow learning and replay engine
///
/// Watches your GUI activity, distills repeated operations into named,
/// parameterizable workflows, scores their reliability from feedback, and
/// replays them (or improvises toward a goal) autonomously.
#[derive(Parser, Debug)]
#[command(
    name = "mimic",
    author,
    version,
    about = "Mimic - desktop workflow learning and replay engine"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract workflows from captured operation history
    Learn {
        /// Capture JSON directory (defaults to the configured watch dir)
        #[arg(long)]
        json_dir: Option<String>,

        /// Workflow store directory
        #[arg(long)]
        workflow_dir: Option<String>,

        /// Oracle model to use
        #[arg(long)]
        model: Option<String>,

        /// Minimum confidence for extracted workflows
        #[arg(long, default_value_t = 0.5)]
        min_confidence: f64,

        /// Stop after segmentation; no oracle calls
        #[arg(long)]
        segments_only: bool,
    },

    /// List stored workflows
    List {
        /// Workflow store directory
        #[arg(long)]
        workflow_dir: Option<String>,

        /// Keyword search over the stored workflows
        #[arg(long, short)]
        query: Option<String>,
    },

    /// Execute toward a goal, replaying a matching workflow or exploring
    Run {
        /// Goal text
        goal: String,

        /// Replay this specific workflow id
        #[arg(long)]
        workflow_id: Option<String>,

        /// Don't actually touch the UI
        #[arg(long)]
        dry_run: bool,

        /// Maximum steps for free exploration
        #[arg(long, default_value_t = 50)]
        max_steps: usize,

        /// Pause between steps, in seconds
        #[arg(long, default_value_t = 1.0)]
        delay: f64,

        /// Skip confirmation for dangerous-app actions
        #[arg(long)]
        no_confirm: bool,
    },

    /// Replay a stored workflow directly
    Play {
        /// Workflow id
        workflow_id: String,

        /// Don't actually touch the UI
        #[arg(long)]
        dry_run: bool,

        /// Pause between steps, in seconds
        #[arg(long, default_value_t = 1.0)]
        delay: f64,

        /// Workflow parameter (key=value, repeatable)
        #[arg(long)]
        param: Vec<String>,
    },

    /// Run the continuous learning daemon
    Watch {
        /// Keep learning in a background task
        #[arg(long)]
        background: bool,
    },

    /// Generate the reproducibility report and refresh the parts catalog
    Report {
        /// Workflow store directory
        #[arg(long)]
        workflow_dir: Option<String>,

        /// Restrict the rendered report to one category
        #[arg(long)]
        category: Option<String>,

        /// Output format
        #[arg(long, default_value = "markdown")]
        format: String,

        /// Also write the report to this path
        #[arg(long, short)]
        output: Option<String>,
    },

    /// Show cross-session learning statistics
    Stats {
        /// Workflow store directory
        #[arg(long)]
        workflow_dir: Option<String>,

        /// Trailing window in days
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = if let Some(command) = args.command {
        command
    } else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Learn { json_dir, workflow_dir, model, min_confidence, segments_only } => {
            commands::learn::execute(json_dir, workflow_dir, model, min_confidence, segments_only)
                .await?;
        }
        Command::List { workflow_dir, query } => {
            commands::list::execute(workflow_dir, query)?;
        }
        Command::Run { goal, workflow_id, dry_run, max_steps, delay, no_confirm } => {
            commands::run::execute(goal, workflow_id, dry_run, max_steps, delay, no_confirm)
                .await?;
        }
        Command::Play { workflow_id, dry_run, delay, param } => {
            commands::play::execute(workflow_id, dry_run, delay, param).await?;
        }
        Command::Watch { background } => {
            commands::watch::execute(background).await?;
        }
        Command::Report { workflow_dir, category, format, output } => {
            commands::report::execute(workflow_dir, category, &format, output)?;
        }
        Command::Stats { workflow_dir, days } => {
            commands::stats::execute(workflow_dir, days)?;
        }
    }

    Ok(())
}
