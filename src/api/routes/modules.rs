//! Module listing endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::ModulesResponse};

/// GET /api/v1/modules
pub async fn list_modules(State(state): State<ApiState>) -> Json<ModulesResponse> {
    Json(ModulesResponse {
        modules: state.registry.modules(),
    })
}
