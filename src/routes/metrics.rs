use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::IntoResponse, Json};

pub async fn metrics_handler<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
