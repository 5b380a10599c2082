//! handlers for the `/scheduler/webhooks` endpoints.

use axum::{Json, extract::State, http::StatusCode};

use super::ApiError;
use crate::AppState;
use crate::service::{
    AddWebhookRequest, AddWebhookResponse, DeleteWebhooksRequest, ListWebhooksRequest,
    ListWebhooksResponse, RotateSecretRequest, RotateSecretResponse,
};

/// post /scheduler/webhooks/add
pub async fn add(
    State(state): State<AppState>,
    Json(req): Json<AddWebhookRequest>,
) -> Result<Json<AddWebhookResponse>, ApiError> {
    Ok(Json(state.scheduler.add_webhook(req)?))
}

/// post /scheduler/webhooks/list
pub async fn list(
    State(state): State<AppState>,
    Json(req): Json<ListWebhooksRequest>,
) -> Result<Json<ListWebhooksResponse>, ApiError> {
    Ok(Json(state.scheduler.list_webhooks(req)?))
}

/// post /scheduler/webhooks/delete
pub async fn delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteWebhooksRequest>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.delete_webhooks(req)?;
    Ok(StatusCode::NO_CONTENT)
}

/// post /scheduler/webhooks/rotate
pub async fn rotate(
    State(state): State<AppState>,
    Json(req): Json<RotateSecretRequest>,
) -> Result<Json<RotateSecretResponse>, ApiError> {
    Ok(Json(state.scheduler.rotate_webhook_secret(req)?))
}
