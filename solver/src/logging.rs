//! Tracing setup for the solver binary.
//!
//! Everything goes to stderr so stdout only ever carries the final program.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// An explicit `level` (from `--log-level`) wins over `RUST_LOG`, which wins
/// over `info`.
///
/// # Example
/// ```bash
/// RUST_LOG=solver=debug solver solve --puzzle day1.md --puzzle-input day1.txt
/// ```
pub fn init(level: Option<&str>) {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn filter(level: Option<&str>) -> EnvFilter {
    level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
