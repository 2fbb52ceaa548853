//! Models listing endpoint handlers.

use crate::api::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// Models list response in OpenAI format.
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelObject>,
}

/// Individual model object.
#[derive(Debug, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelObject {
    fn new(id: String, created: i64) -> Self {
        Self {
            id,
            object: "model".to_string(),
            created,
            owned_by: "switchboard".to_string(),
        }
    }
}

/// GET /v1/models - models currently advertised by the connected fleet.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let created = chrono::Utc::now().timestamp();
    let data = state
        .hub
        .list_models()
        .into_iter()
        .map(|id| ModelObject::new(id, created))
        .collect();
    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

/// GET /v1/models/:model
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
) -> Response {
    let created = chrono::Utc::now().timestamp();
    if state.hub.list_models().contains(&model) {
        Json(ModelObject::new(model, created)).into_response()
    } else {
        ApiError::model_not_found(&model).into_response()
    }
}
