//! Request handlers.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::AppState;
use crate::gateway::GatewayError;
use crate::models::Snapshot;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Submit a request and answer with its current snapshot.
pub async fn submit_query(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Snapshot>, GatewayError> {
    let snapshot = state
        .gateway
        .submit_with_cancel(&body, Some(state.shutdown.clone()))
        .await?;
    Ok(Json(snapshot))
}

fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::Malformed(_) => StatusCode::BAD_REQUEST,
        GatewayError::DisallowedShape { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Cancelled
        | GatewayError::Transport(_)
        | GatewayError::ReplyChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::BadReply(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if self.is_rejection() {
            tracing::debug!("Rejected request: {}", self);
        } else {
            tracing::warn!("Query failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
