//! Structured logging setup, built on
//! `tracing_subscriber::fmt().with_env_filter(...)`, with `RUST_LOG`
//! taking precedence over the `--log-level` flag when both are set.

use tracing_subscriber::EnvFilter;

pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
