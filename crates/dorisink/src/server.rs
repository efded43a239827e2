//! Admin HTTP server.
//!
//! Serves `/metrics`, `/health` and `/ready` on the configured metrics
//! port. Runs on its own task and shuts down with the process-wide token.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;

use dorisink_observability::{create_admin_router, Readiness};

/// Bind and serve until the token is cancelled.
pub async fn serve_admin(
    port: u16,
    readiness: Readiness,
    token: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = create_admin_router(readiness);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "admin server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    info!("admin server stopped");
    Ok(())
}
