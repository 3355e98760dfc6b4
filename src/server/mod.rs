//! RESP server
//!
//! Accepts TCP connections and hands each one to a [`ClientHandler`] running
//! on its own task. The number of live connections is bounded by
//! `max_clients`; further clients wait in the accept backlog.

mod connection;

pub use connection::ClientHandler;

use crate::config::ServerSettings;
use crate::connection::Connection;
use crate::database::Database;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Bind `bind:port` and serve until `shutdown` is cancelled
pub async fn run<D: Database>(
    settings: &ServerSettings,
    db: Arc<D>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", settings.bind, settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {}", addr))?;
    info!("FerrumRing RESP server listening on {}", addr);

    serve(listener, db, settings.max_clients, shutdown).await
}

/// Accept loop over an already bound listener
///
/// On shutdown the listener is dropped, every handler is cancelled and
/// awaited, then the database is closed.
pub async fn serve<D: Database>(
    listener: TcpListener,
    db: Arc<D>,
    max_clients: usize,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let slots = Arc::new(Semaphore::new(max_clients.max(1)));
    let tracker = TaskTracker::new();

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&slots).acquire_owned() => permit?,
        };

        let (socket, addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // usually fd exhaustion; back off instead of spinning
                    error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        if let Err(e) = socket.set_nodelay(true) {
            warn!("Cannot set TCP_NODELAY for {}: {}", addr, e);
        }
        info!("New RESP connection from {}", addr);

        let handler = ClientHandler::new(Arc::clone(&db), Connection::new(addr), shutdown.child_token());
        tracker.spawn(async move {
            handler.handle(socket).await;
            drop(permit);
        });
    }

    drop(listener);
    info!("Server shutting down, waiting for {} connections", tracker.len());
    tracker.close();
    tracker.wait().await;

    db.close().await;
    info!("Server stopped");
    Ok(())
}
