//! Startup configuration: a `clap::Parser` struct with a small flat set
//! of CLI flags and defaults.

use crate::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[clap(
    author,
    version,
    about = "Archive server for pipeline execution records"
)]
pub struct Config {
    /// Address to listen on, e.g. `0.0.0.0:7930`.
    #[clap(long, default_value = "127.0.0.1:7930")]
    pub listen: String,

    /// Path to the SQLite/turso database file, or `:memory:` for an
    /// ephemeral in-process database.
    #[clap(long, default_value = "archive.db")]
    pub database_path: String,

    /// Log level (trace, debug, info, warn, error).
    #[clap(long, default_value = "info")]
    pub log_level: String,

    /// Default page size used when a list request leaves page_size unset.
    #[clap(skip = DEFAULT_PAGE_SIZE)]
    pub default_page_size: usize,

    /// Hard cap a requested page size is silently clamped to.
    #[clap(skip = MAX_PAGE_SIZE)]
    pub max_page_size: usize,
}
