// Wall Signal - live runner
// Usage: wall_signal [config.json]

use std::process::ExitCode;
use tracing::{error, info, warn};

use wall_signal::core::{setup_logging_from_config, AppConfig, MonitoringConfig, Shutdown};
use wall_signal::layer4::run_live;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args().nth(1);

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            setup_logging_from_config(&MonitoringConfig {
                log_file: None,
                ..MonitoringConfig::default()
            });
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    setup_logging_from_config(&config.monitoring);
    info!(summary = ?config.summary(), "Starting wall signal");

    let shutdown = Shutdown::new();
    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                on_interrupt.trigger();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    match run_live(config, shutdown).await {
        Ok(summary) => {
            info!(summary = %summary, "Stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to start");
            ExitCode::FAILURE
        }
    }
}
