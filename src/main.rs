use anyhow::Result;
use offpeak::config::Config;
use offpeak::registry::EntityRegistry;
use offpeak::runtime::TrackerRuntime;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;

    offpeak::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    info!("Offpeak energy tracker starting up");

    let registry = Arc::new(EntityRegistry::new());

    // Restore previously published entity states, best-effort
    if let Some(ref restore_file) = config.restore_file {
        if let Err(e) = registry.load_snapshot(restore_file) {
            error!("Failed to restore registry snapshot: {}", e);
        }
    }

    let mut tasks = Vec::new();
    for tracker_config in &config.trackers {
        let runtime = TrackerRuntime::new(tracker_config, registry.clone(), &config.storage_dir)
            .map_err(|e| anyhow::anyhow!("Failed to create tracker: {}", e))?;
        info!("Starting tracker {}", runtime.unique_id());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = runtime.run().await {
                error!("Tracker failed with error: {}", e);
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for task in &tasks {
        task.abort();
    }

    if let Some(ref restore_file) = config.restore_file {
        if let Err(e) = registry.save_snapshot(restore_file) {
            error!("Failed to save registry snapshot: {}", e);
        }
    }

    info!("Tracker shutdown complete");
    Ok(())
}
