//! Logging initialization.
//!
//! Installs a `tracing-subscriber` registry writing to stderr so that
//! JSON and table output on stdout stay machine-readable.

use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Must be called at most once.
///
/// # Formats
///
/// * `"pretty"` - Human-readable multi-line output
/// * `"compact"` - One line per event
/// * `"json"` - Machine-parseable JSON lines
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format.as_str() {
        "pretty" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        "compact" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        "json" => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        other => {
            return Err(anyhow!(
                "unknown log format '{}', expected 'pretty', 'compact' or 'json'",
                other
            ))
        }
    };

    result.map_err(|e| anyhow!("failed to initialize tracing subscriber: {}", e))
}
