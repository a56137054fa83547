use anyhow::{Context, Result};
use chrono::Utc;

use dropler::account::AccountState;
use dropler::config::Config;
use dropler::stats::FileStatistics;
use dropler::storage::{AccountStore, FileStore};

pub async fn status(config: Config, task: Option<u32>) -> Result<()> {
    let store = FileStore::new(&config.storage.data_dir);
    let ids = match task {
        Some(id) => vec![id],
        None => store.task_ids().await.context("Failed to scan data directory")?,
    };

    if ids.is_empty() {
        println!("No tasks found in {}", config.storage.data_dir.display());
        return Ok(());
    }

    let now = Utc::now();
    let pause = config.worker.pause_between_runs();

    for id in ids {
        let accounts = store
            .load_all(id)
            .await
            .with_context(|| format!("Failed to load accounts for task {id}"))?;
        let stats = FileStatistics::load(store.statistics_path(id)).await;

        println!("Task {id}");
        println!("{:-<72}", "");
        println!(
            "{:<20} {:<14} {:<10} {:>8}  {}",
            "ACCOUNT", "STATE", "ACTION", "DROPS", "LAST START"
        );

        let mut active = 0;
        for account in &accounts {
            let state = account.state(now, pause);
            if state == AccountState::Active {
                active += 1;
            }
            let drops = stats
                .get(&account.name)
                .await
                .map(|s| s.total_drops_count)
                .unwrap_or(0);
            let last_start = account
                .last_start_time
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());

            println!(
                "{:<20} {:<14} {:<10} {:>8}  {}",
                account.display_name(),
                state.to_string(),
                account.action,
                drops,
                last_start
            );
        }

        println!("{:-<72}", "");
        println!("{} accounts, {} active\n", accounts.len(), active);
    }

    Ok(())
}
