//! Read-only nodes API.

use crate::api::AppState;
use crate::hub::NodeView;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeView>,
}

/// GET /api/nodes - every connected worker with its capacity and load.
pub async fn handle(State(state): State<Arc<AppState>>) -> Json<NodesResponse> {
    Json(NodesResponse {
        nodes: state.hub.nodes(),
    })
}
