use std::process;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use stackcd::{init_logging, load_config, Controller, LogFormat, Scheduler};

const CONFIGS_PATH_ENV_VAR: &str = "CONFIGS_PATH";
const LOG_FORMAT_ENV_VAR: &str = "LOG_FORMAT";

fn main() {
    let format = std::env::var(LOG_FORMAT_ENV_VAR)
        .ok()
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or_default();
    init_logging(format);

    info!("Starting stackcd v{}", env!("CARGO_PKG_VERSION"));

    let configs_path = std::env::var(CONFIGS_PATH_ENV_VAR).unwrap_or_else(|_| ".".to_string());
    let config = match load_config(&configs_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration from {}: {}", configs_path, e);
            process::exit(1);
        }
    };

    let controller = match Controller::from_config(&config) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            error!("Failed to start controller: {}", e);
            process::exit(1);
        }
    };

    let scheduler = match Scheduler::new(
        Arc::clone(&controller),
        config.concurrency,
        Duration::from_secs(config.update_interval),
    ) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Failed to start workers: {}", e);
            controller.shutdown();
            process::exit(1);
        }
    };

    let (signal_tx, signal_rx) = crossbeam_channel::bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    }) {
        error!("Failed to install signal handler: {}", e);
        controller.shutdown();
        process::exit(1);
    }

    if let Err(e) = scheduler.start() {
        error!("Failed to start scheduler: {}", e);
        controller.shutdown();
        process::exit(1);
    }

    let _ = signal_rx.recv();
    info!("Shutdown signal received, waiting for running reconciliations");
    scheduler.stop();
    info!("stackcd stopped");
}
