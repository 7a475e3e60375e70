//! Logging setup for the provider process.
//!
//! All logs are written to **stderr**; stdout carries only the port
//! handshake the engine reads at startup.
//!
//! The engine passes its own verbosity to plugins as `-v=<n>`. That number is
//! mapped onto a `tracing` level by [`filter_for_verbosity`], unless
//! `RUST_LOG` is set, in which case `RUST_LOG` wins.
//!
//! ```bash
//! # Provider debug output during an update
//! pulumi up --logtostderr -v=5
//!
//! # Or directly, for one module
//! RUST_LOG=pulumi_package::command=debug pulumi up
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// The default filter directive for an engine verbosity level.
///
/// `0` shows warnings and errors, `1..=3` info, `4..=8` debug and anything
/// higher trace.
pub fn filter_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1..=3 => "info",
        4..=8 => "debug",
        _ => "trace",
    }
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry().with(build_filter(default_level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Initialize the global subscriber at `info`, or `RUST_LOG` if set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize the global subscriber with a custom default level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Initialize the global subscriber for an engine verbosity level.
///
/// Returns `false` if a subscriber was already set.
pub fn try_init_logging(verbosity: u8) -> bool {
    subscriber(filter_for_verbosity(verbosity)).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so these
    // tests stick to filter construction.

    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(filter_for_verbosity(0), "warn");
        assert_eq!(filter_for_verbosity(3), "info");
        assert_eq!(filter_for_verbosity(4), "debug");
        assert_eq!(filter_for_verbosity(9), "trace");
        assert_eq!(filter_for_verbosity(u8::MAX), "trace");
    }

    #[test]
    fn test_filter_directives_parse() {
        for v in [0, 1, 5, 11] {
            assert!(EnvFilter::try_new(filter_for_verbosity(v)).is_ok());
        }
        assert!(EnvFilter::try_new("warn,pulumi_package::command=debug").is_ok());
    }
}
