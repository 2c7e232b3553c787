//! Model catalog endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::models::ModelInfo;

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    /// Models reported by the provider, as last fetched
    pub models: Vec<ModelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    /// Models a conversation may switch to
    pub allowed: Vec<String>,
}

/// Current catalog snapshot
async fn list_models(State(state): State<Arc<ApiState>>) -> Json<ModelListResponse> {
    let snapshot = state.catalog.snapshot();

    Json(ModelListResponse {
        models: snapshot.models.clone(),
        last_update: snapshot.last_update.map(|t| t.to_rfc3339()),
        allowed: state.allowed_models.clone(),
    })
}

/// Build the models router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", get(list_models)).with_state(state)
}
