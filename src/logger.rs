//! Log output setup.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the binary (or a test that wants to see them). `RUST_LOG` always wins over
//! the configured level.

use crate::config::LoggingConfig;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for `verbosity` extra `-v` flags on top of `configured`.
pub fn level_for(configured: &str, verbosity: u8) -> String {
    match verbosity {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(&config.level, verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .with_ansi(config.ansi)
                .with_writer(std::io::stderr),
        )
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_configured_level() {
        assert_eq!(level_for("warn", 0), "warn");
        assert_eq!(level_for("warn", 1), "debug");
        assert_eq!(level_for("info", 4), "trace");
    }
}
