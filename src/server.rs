//! Server loop: a `TcpListener` accept loop, one spawned task per
//! connection, a `tokio::sync::watch<bool>` shutdown signal threaded
//! into every in-flight request. `tokio::select!` races
//! `listener.accept()` against the shutdown flag, `tokio::spawn` per
//! connection, generalized from a Unix socket to a TCP listener.

use crate::protocol::{read_frame, write_frame, ArchiveRequest, ArchiveResponse};
use crate::rpc::ArchiveService;
use crate::storage::StorageAdapter;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct Server<S: StorageAdapter + 'static> {
    service: Arc<ArchiveService<S>>,
    listener: TcpListener,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: StorageAdapter + 'static> Server<S> {
    pub async fn bind(
        addr: &str,
        storage: Arc<S>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, "archive server listening");
        Ok(Server {
            service: Arc::new(ArchiveService::new(storage)),
            listener,
            shutdown_rx,
        })
    }

    /// Accepts connections until the shutdown signal fires, spawning one
    /// task per connection. Each task gets its own clone of the shutdown
    /// receiver so a long-running `ListResults` scan can abort mid-batch
    /// (the pagination engine checks the signal between batches and
    /// aborts with a cancelled error).
    pub async fn run(mut self) -> std::io::Result<()> {
        loop {
            if *self.shutdown_rx.borrow() {
                info!("shutdown signal received, stopping accept loop");
                return Ok(());
            }

            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            let service = self.service.clone();
                            let shutdown_rx = self.shutdown_rx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, service, shutdown_rx).await {
                                    warn!(%peer, error = %e, "connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("shutdown signal received, stopping accept loop");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn to_io_vec<T: serde::Serialize>(value: &T) -> std::io::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

async fn handle_connection<S: StorageAdapter + 'static>(
    mut stream: TcpStream,
    service: Arc<ArchiveService<S>>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        let request: ArchiveRequest = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                let response = ArchiveResponse::Error {
                    error: crate::protocol::WireError {
                        code: "invalid_argument".to_string(),
                        message: format!("malformed request: {e}"),
                    },
                };
                let payload = to_io_vec(&response)?;
                write_frame(&mut stream, &payload).await?;
                continue;
            }
        };

        let response = service.handle(request, shutdown_rx.clone()).await;
        let payload = to_io_vec(&response)?;
        write_frame(&mut stream, &payload).await?;
    }
}
