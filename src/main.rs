use clap::Parser;
use results_archive::config::Config;
use results_archive::logging;
use results_archive::server::Server;
use results_archive::storage::sqlite::SqliteAdapter;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    logging::init(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        database_path = %config.database_path,
        "starting archive server"
    );

    let storage = Arc::new(SqliteAdapter::open(&config.database_path).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, signalling shutdown");
        let _ = shutdown_tx.send(true);
    });

    let server = Server::bind(&config.listen, storage, shutdown_rx).await?;
    server.run().await?;

    info!("archive server shutdown complete");
    Ok(())
}
