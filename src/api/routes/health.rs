//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{HealthResponse, StorageHealth},
};

/// GET /api/v1/health
///
/// Reports the bound storage backend's health. Answers 503 when the
/// backend reports itself unhealthy.
pub async fn health_check(
    State(state): State<ApiState>,
) -> ApiResult<(StatusCode, Json<HealthResponse>)> {
    let health = state.persistence.health_check().await?;

    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((
        status,
        Json(HealthResponse {
            status: if health.healthy { "ok" } else { "degraded" }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            storage: StorageHealth {
                backend: state.persistence.name().to_string(),
                healthy: health.healthy,
                message: health.message,
                metadata: health.metadata,
            },
        }),
    ))
}
