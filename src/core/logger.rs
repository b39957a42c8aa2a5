// Structured Logging for Wall Signal
// tracing + tracing-subscriber, initialised once per process

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::core::config::MonitoringConfig;

static INIT: Once = Once::new();

fn parse_level(log_level: &str) -> Level {
    match log_level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    // Suppress noisy transport crates
    for directive in [
        "tokio_tungstenite=warn",
        "tungstenite=warn",
        "hyper=warn",
        "hyper_util=warn",
        "reqwest=warn",
        "rustls=warn",
    ] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }
    filter
}

/// Setup structured logging for the entire application
pub fn setup_logging(
    log_level: Option<&str>,
    log_file: Option<&str>,
    json_format: Option<bool>,
) {
    let log_level_str = log_level.unwrap_or("INFO").to_string();
    let json_format = json_format.unwrap_or(false);
    let level = parse_level(&log_level_str);

    INIT.call_once(|| {
        let filter = build_filter(level);

        // A file sink replaces console output; failure to open it falls back to stdout
        let file = log_file.and_then(|path| {
            if let Some(parent) = Path::new(path).parent() {
                let _ = fs::create_dir_all(parent);
            }
            OpenOptions::new().create(true).append(true).open(path).ok()
        });

        let result = match (file, json_format) {
            (Some(file), true) => tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_writer(Mutex::new(file))
                .with_env_filter(filter)
                .try_init(),
            (Some(file), false) => tracing_subscriber::fmt()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_env_filter(filter)
                .try_init(),
            (None, true) => tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(filter)
                .try_init(),
            (None, false) => tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init(),
        };

        if result.is_ok() {
            tracing::info!(
                log_level = %log_level_str,
                log_file = ?log_file,
                json = json_format,
                "Logging initialized"
            );
        }
    });
}

pub fn setup_logging_from_config(monitoring: &MonitoringConfig) {
    setup_logging(
        Some(&monitoring.log_level),
        monitoring.log_file.as_deref(),
        Some(monitoring.json_logs),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARNING"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_setup_logging_is_idempotent() {
        setup_logging(Some("DEBUG"), None, Some(false));
        setup_logging(Some("INFO"), None, Some(true));
    }
}
