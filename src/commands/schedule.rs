use anyhow::{Context, Result};

use dropler::config::Config;
use dropler::scheduler::ScheduleAction;
use dropler::storage::{FileStore, ScheduleStore};

use crate::ScheduleCommand;

pub async fn schedule(config: Config, task: u32, action: ScheduleCommand) -> Result<()> {
    let store = FileStore::new(&config.storage.data_dir);
    let mut schedule = store
        .load_schedule(task)
        .await
        .with_context(|| format!("Failed to load schedule for task {task}"))?;

    match action {
        ScheduleCommand::Show => {
            println!("Task {task}");
            print!("{}", schedule.display());
            return Ok(());
        }
        ScheduleCommand::Enable => schedule.use_schedule = true,
        ScheduleCommand::Disable => schedule.use_schedule = false,
        ScheduleCommand::AddInterval { start, stop } => schedule.add_interval(&start, &stop)?,
        ScheduleCommand::AddStart { time } => schedule.add_single_start(&time)?,
        ScheduleCommand::AddStop { time } => schedule.add_single_stop(&time)?,
        ScheduleCommand::AddOnce { at, stop } => {
            let action = if stop {
                ScheduleAction::Stop
            } else {
                ScheduleAction::Start
            };
            schedule.add_one_time(at, action);
        }
        ScheduleCommand::Clear => schedule.clear_entries(),
    }

    store
        .save_schedule(task, &schedule)
        .await
        .with_context(|| format!("Failed to save schedule for task {task}"))?;

    tracing::info!(task, "Schedule updated");
    print!("{}", schedule.display());
    Ok(())
}
