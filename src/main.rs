use dotenv::dotenv;
use landslide_monitor::app_state::AppState;
use landslide_monitor::config::{ConfigStore, DEFAULT_CONFIG_FILE};
use landslide_monitor::logging::init_tracing;
use landslide_monitor::prelude::*;
use landslide_monitor::server::run_server;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// `--config <path>`, then `LANDSLIDE_CONFIG`, then `config.json`.
fn config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return PathBuf::from(path);
        }
    }
    std::env::var("LANDSLIDE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

async fn shutdown_signal(handle: axum_server::Handle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
    handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = Arc::new(ConfigStore::load(config_path()));
    let logs = init_tracing(&config.get().logging)?;
    info!("Starting landslide monitoring service");
    info!("Using configuration {:?}", config.path());
    if let Some(e) = config.load_error() {
        error!("Failed to load config file {:?}: {}", config.path(), e);
        warn!("Using default configuration");
    }

    let app_state = AppState::new(config, logs).await?;
    let outcome = app_state.start().await;
    info!("Scheduler start: {:?}", outcome);

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    let served = run_server(app_state.clone(), handle).await;
    app_state.shutdown().await;
    served
}
