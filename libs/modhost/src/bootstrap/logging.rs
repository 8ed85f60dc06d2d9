//! Logging initialization for host processes.
//!
//! `RUST_LOG` always takes precedence over the configured level. Without either,
//! the filter defaults to `info`. Output goes to stderr as text or JSON lines.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use super::config::{LogFormat, LoggingConfig};

/// Build the filter: `RUST_LOG` if set, else the configured directive, else `info`.
fn build_filter(level: &str) -> EnvFilter {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::from_default_env();
    }
    let directive = if level.trim().is_empty() { "info" } else { level };
    EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter '{directive}': {err}; falling back to 'info'");
        EnvFilter::new("info")
    })
}

/// Install the global subscriber.
///
/// Fails silently if a subscriber is already installed, so tests and embedding
/// applications can call it more than once.
pub fn init_logging(config: &LoggingConfig) {
    let filter = build_filter(&config.level);
    let ansi = std::env::var_os("NO_COLOR").is_none();

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(ansi),
            )
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            )
            .with(filter)
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(format = ?config.format, "Logging initialized");
    }
}
