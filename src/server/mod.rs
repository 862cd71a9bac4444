//! HTTP surface for the job orchestrator.
//!
//! Routes are grouped under `/api/v1`; `/metrics` and `/health` sit at the root.
//!
//! | Method | Path                              | Operation            |
//! |--------|-----------------------------------|----------------------|
//! | POST   | /api/v1/jobs                      | submit               |
//! | GET    | /api/v1/jobs                      | list jobs            |
//! | GET    | /api/v1/jobs/:id                  | status snapshot      |
//! | POST   | /api/v1/jobs/:id/cancel           | cancel               |
//! | GET    | /api/v1/jobs/:id/results          | completed results    |
//! | GET    | /api/v1/jobs/:id/partial          | partial results      |
//! | GET    | /api/v1/jobs/:id/mindmap          | full mind-map        |
//! | GET    | /api/v1/jobs/:id/events           | live events (SSE)    |
//! | GET    | /api/v1/nodes/:id                 | node detail          |
//! | GET    | /api/v1/nodes/:id/children        | child nodes          |
//! | POST   | /api/v1/nodes/:id/replay          | replay (play / step) |
//! | GET    | /api/v1/nodes/:id/replay/stream   | replay frames (SSE)  |
//! | GET    | /api/v1/agents                    | agent descriptors    |
//! | GET    | /api/v1/phases                    | phase plan           |

pub mod api;

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;

use crate::metrics::metrics_handler;
use crate::pipeline::JobOrchestrator;

pub use api::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: JobOrchestrator,
}

/// Builds the full application router.
pub fn router(orchestrator: JobOrchestrator) -> Router {
    Router::new()
        .nest("/api/v1", api::routes())
        .route("/metrics", get(metrics_handler))
        .route("/health", get(api::health))
        .with_state(AppState { orchestrator })
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(orchestrator: JobOrchestrator, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
