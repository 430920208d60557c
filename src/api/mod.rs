//! REST API for collector health and statistics
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Scheduler handle** for flush and retention counters
//! - **Module registry** for the bound providers
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Storage backend health
//! - `GET /api/v1/stats` - Flush and retention statistics
//! - `GET /api/v1/modules` - Registered modules and their providers

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{HealthResponse, ModulesResponse, StatsResponse};

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/modules", get(routes::modules::list_modules))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(
    bind_addr: SocketAddr,
    state: ApiState,
) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", bind_addr);

    let app = router(state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    // Spawn server in background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
