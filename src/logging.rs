//! Tracing setup for binaries and tools embedding memtriage.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the host installs a subscriber, either its own or the one from [`init`].

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "memtriage=info";

/// Logging options.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Log at debug level (ignored when `RUST_LOG` is set)
    pub verbose: bool,
    /// Only warnings and errors (ignored when `RUST_LOG` is set)
    pub quiet: bool,
}

impl LogOptions {
    /// Filter directives used when `RUST_LOG` is unset.
    pub fn default_filter(&self) -> &'static str {
        if self.verbose {
            "memtriage=debug"
        } else if self.quiet {
            "memtriage=warn"
        } else {
            DEFAULT_LOG_FILTER
        }
    }
}

/// Install a stderr fmt subscriber. `RUST_LOG` overrides the options.
///
/// Fails if a global subscriber is already installed.
#[cfg(not(tarpaulin_include))]
pub fn init(options: LogOptions) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_filter()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
