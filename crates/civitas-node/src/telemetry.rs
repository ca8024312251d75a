//! Logging initialization.

use crate::config::LoggingConfig;
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Flushes the file writer on drop; held for the life of the process.
static LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Build the level filter. `RUST_LOG` wins over the configured level.
pub fn filter(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

/// Install the global subscriber described by `config`.
pub fn init_telemetry(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = filter(&config.level)?;
    let json = config.format == "json";

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file '{}': {}", path.display(), e))?;
            let (writer, guard) = tracing_appender::non_blocking(file);

            let registry = tracing_subscriber::registry().with(filter);
            if json {
                registry.with(fmt::layer().json().with_writer(writer)).try_init()?;
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .try_init()?;
            }

            if let Ok(mut g) = LOG_GUARD.lock() {
                *g = Some(guard);
            }
        }
        None if json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_rejected() {
        if std::env::var("RUST_LOG").is_err() {
            assert!(filter("civitas=verbose").is_err());
        }
    }

    #[test]
    fn test_level_filter_parses() {
        assert!(filter("debug,civitas_governance=trace").is_ok());
    }
}
