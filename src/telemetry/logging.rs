use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::Settings;
use crate::error::Error;
use crate::types::Result;

/// Parse a configured log level, falling back to info
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let log_level = parse_level(&settings.general.log_level);

    // Create environment filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string().to_lowercase()));

    // Whether to use JSON format
    let result = if settings.telemetry.structured_logging {
        let fmt_layer = fmt::Layer::default()
            .with_target(true)
            .with_thread_ids(true)
            .json();
        Registry::default().with(filter).with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::Layer::default()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(true);
        Registry::default().with(filter).with(fmt_layer).try_init()
    };

    result.map_err(|e| Error::Internal(format!("Failed to set global default subscriber: {}", e)))
}

/// Create a test logging subscriber
#[cfg(test)]
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let fmt_layer = fmt::Layer::default()
        .with_test_writer()
        .with_target(true)
        .with_ansi(false);

    // Several tests may race to install the subscriber
    let _ = Registry::default().with(filter).with(fmt_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_second_init_is_an_error() {
        init_test_logging();
        assert!(init_logging(&Settings::default()).is_err());
    }
}
