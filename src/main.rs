use anyhow::Result;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropler::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "dropler",
    version,
    about = "Admission-controlled account session scheduler",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers and schedule engines until Ctrl+C
    Run {
        /// Task ids to run (default: every task in the data directory)
        #[arg(short, long, value_delimiter = ',')]
        tasks: Vec<u32>,

        /// Simulate one drop per session as "<game_id>:<item_def_id>"
        #[arg(long)]
        simulate_drop: Option<String>,

        /// Print Prometheus metrics on shutdown
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// Show account states and statistics
    Status {
        /// Task id (default: all tasks)
        #[arg(short, long)]
        task: Option<u32>,
    },

    /// Inspect or edit a task's schedule
    Schedule {
        /// Task id
        #[arg(short, long, default_value = "1")]
        task: u32,

        #[command(subcommand)]
        action: ScheduleCommand,
    },

    /// Manage tasks
    Task {
        #[command(subcommand)]
        action: TaskCommand,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Print the schedule
    Show,
    /// Turn the schedule on
    Enable,
    /// Turn the schedule off
    Disable,
    /// Add a daily start/stop interval
    AddInterval {
        /// Start time (HH:MM)
        start: String,
        /// Stop time (HH:MM)
        stop: String,
    },
    /// Add a daily start time
    AddStart {
        /// Time (HH:MM)
        time: String,
    },
    /// Add a daily stop time
    AddStop {
        /// Time (HH:MM)
        time: String,
    },
    /// Add a one-time action at a local timestamp
    AddOnce {
        /// Local time, e.g. "2024-05-01 10:00"
        #[arg(value_parser = parse_timestamp)]
        at: NaiveDateTime,
        /// Stop instead of start
        #[arg(long, default_value = "false")]
        stop: bool,
    },
    /// Remove every schedule entry
    Clear,
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// List tasks with account counts
    List,
    /// Create a task under the lowest free id
    Create,
    /// Delete a task and its data
    Delete {
        /// Task id
        id: u32,
    },
}

fn parse_timestamp(value: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .map_err(|e| format!("expected 'YYYY-MM-DD HH:MM': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run {
            tasks,
            simulate_drop,
            metrics,
        } => {
            tracing::info!(tasks = ?tasks, metrics, "Starting run command");
            commands::run(config, tasks, simulate_drop, metrics).await?;
        }

        Commands::Status { task } => {
            commands::status(config, task).await?;
        }

        Commands::Schedule { task, action } => {
            commands::schedule(config, task, action).await?;
        }

        Commands::Task { action } => {
            commands::task(config, action).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("dropler=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new(format!("dropler={level},warn"))
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
