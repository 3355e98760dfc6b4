//! HTTP server implementation

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handlers::{cluster_handler, execute_command, stats_handler};
use crate::database::Database;

/// Status API routes over `db`
pub fn router<D: Database>(db: Arc<D>) -> Router {
    Router::new()
        .route("/command", post(execute_command::<D>))
        .route("/stats", get(stats_handler::<D>))
        .route("/cluster", get(cluster_handler::<D>))
        .layer(CorsLayer::permissive())
        .with_state(db)
}

/// Serve the status API until `shutdown` is cancelled
pub async fn run_web<D: Database>(
    addr: &str,
    db: Arc<D>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web interface available at http://{}", addr);

    axum::serve(listener, router(db))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
