use anyhow::{Context, Result};
use std::sync::Arc;

use dropler::config::Config;
use dropler::metrics;
use dropler::scheduler::{DropRegistry, TaskManager, TaskServices};
use dropler::session::DryRunSessions;
use dropler::storage::FileStore;

pub async fn run(
    config: Config,
    tasks: Vec<u32>,
    simulate_drop: Option<String>,
    print_metrics: bool,
) -> Result<()> {
    println!("Starting dropler");
    println!("================");

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let store = Arc::new(FileStore::new(&config.storage.data_dir));

    let mut sessions = DryRunSessions::new();
    if let Some(spec) = simulate_drop {
        let (game, item) = spec
            .split_once(':')
            .with_context(|| format!("Invalid drop '{spec}'. Expected <game_id>:<item_def_id>"))?;
        let game_id: u32 = game
            .parse()
            .with_context(|| format!("Invalid game id '{game}'"))?;
        sessions = sessions.with_simulated_drop(game_id, item);
    }

    let services = TaskServices {
        accounts: store.clone(),
        schedules: store.clone(),
        sessions: Arc::new(sessions),
        statistics: store.clone(),
        registry: Arc::new(DropRegistry::new(store.clone())),
    };
    let manager = TaskManager::new(services, config.worker.clone())
        .with_start_stagger(config.start_stagger());

    let ids = if tasks.is_empty() {
        store
            .task_ids()
            .await
            .context("Failed to scan data directory for tasks")?
    } else {
        tasks
    };
    if ids.is_empty() {
        println!(
            "No tasks found in {}. Create one with `dropler task create`.",
            config.storage.data_dir.display()
        );
        return Ok(());
    }

    println!("  Data dir: {}", config.storage.data_dir.display());
    println!("  Parallel limit: {}", config.worker.parallel_limit);
    println!("  Start spacing: {}s", config.worker.start_spacing_secs);
    println!("  Session: {} min", config.worker.session_duration_minutes);
    println!("  Pause between runs: {} min", config.worker.pause_between_runs_minutes);
    println!();

    for id in &ids {
        let task = manager
            .open_task(*id)
            .await
            .with_context(|| format!("Failed to open task {id}"))?;
        let schedule = task.schedule().config().await;
        println!(
            "Task {}: {} accounts, schedule {}",
            id,
            task.worker().snapshot().await.len(),
            if schedule.use_schedule { "on" } else { "off" }
        );
    }

    let started = manager.start_all().await;
    println!("\nStarted {started} of {} tasks. Press Ctrl+C to stop.\n", ids.len());

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            println!("\nShutdown signal received, stopping...");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }

    for (id, report) in manager.shutdown().await {
        println!(
            "Task {}: reset {} accounts, {} disconnect failures{}",
            id,
            report.accounts_reset,
            report.disconnect_failures,
            if report.timed_out { " (timed out)" } else { "" }
        );
    }

    if print_metrics {
        println!("\n{}", metrics::gather_metrics());
    }

    println!("dropler stopped.");
    Ok(())
}
