use anyhow::{Context, Result};

use dropler::config::Config;
use dropler::storage::{AccountStore, FileStore, ScheduleStore};

use crate::TaskCommand;

pub async fn task(config: Config, action: TaskCommand) -> Result<()> {
    let store = FileStore::new(&config.storage.data_dir);
    let ids = store
        .task_ids()
        .await
        .context("Failed to scan data directory")?;

    match action {
        TaskCommand::List => {
            if ids.is_empty() {
                println!("No tasks found in {}", config.storage.data_dir.display());
                return Ok(());
            }
            println!("{:<6} {:>9} {:>9}  {}", "TASK", "ACCOUNTS", "ENABLED", "SCHEDULE");
            for id in ids {
                let accounts = store.load_all(id).await.unwrap_or_else(|e| {
                    tracing::warn!(task = id, "Failed to load accounts: {}", e);
                    Vec::new()
                });
                let schedule = store.load_schedule(id).await.unwrap_or_default();
                println!(
                    "{:<6} {:>9} {:>9}  {}",
                    id,
                    accounts.len(),
                    accounts.iter().filter(|a| a.enabled).count(),
                    if schedule.use_schedule { "on" } else { "off" }
                );
            }
        }
        TaskCommand::Create => {
            let id = (1..u32::MAX)
                .find(|id| !ids.contains(id))
                .context("No free task id")?;
            store
                .create_task_dir(id)
                .await
                .with_context(|| format!("Failed to create task {id}"))?;
            println!("Created task {id} at {}", store.task_dir(id).display());
        }
        TaskCommand::Delete { id } => {
            if !ids.contains(&id) {
                anyhow::bail!("Task {id} not found");
            }
            store
                .remove_task(id)
                .await
                .with_context(|| format!("Failed to delete task {id}"))?;
            println!("Deleted task {id}");
        }
    }

    Ok(())
}
