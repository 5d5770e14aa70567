//! taskminder - demo driver
//!
//! Registers a few tasks with near deadlines and logs their reminders.

use std::sync::Arc;
use std::time::Duration;

use taskminder::reminder::LogNotifier;
use taskminder::{Config, NewTask, Priority, TaskPatch, TaskStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskminder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: missed_ticks={:?} notify_timeout={}s clock={:?}",
        config.missed_ticks,
        config.notify_timeout.as_secs(),
        config.clock
    );

    let store = TaskStore::from_config(Arc::new(LogNotifier), &config)?;
    let now = store.now();

    store.add_task(
        NewTask::new("Submit expense report")
            .priority(Priority::High)
            .deadline(now + chrono::Duration::seconds(10)),
    );
    let standup = store.add_task(
        NewTask::new("Stand up and stretch")
            .description("Every few seconds, forever")
            .priority(Priority::Low)
            .deadline(now + chrono::Duration::seconds(5))
            .recurring_every(Duration::from_secs(15)),
    );
    store.edit_task(
        standup.id,
        TaskPatch::new().recurrence_interval(Some(Duration::from_secs(5))),
    );

    for task in store.list_tasks() {
        info!("{}", serde_json::to_string(&task)?);
    }

    match config.demo_duration {
        Some(duration) => {
            info!("Running for {}s", duration.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            info!("Waiting for reminders, press Ctrl-C to exit");
            tokio::signal::ctrl_c().await?;
        }
    }

    store.shutdown();
    info!("Shut down with {} task(s) registered", store.len());
    Ok(())
}
