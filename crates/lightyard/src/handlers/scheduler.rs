//! handlers for the `/scheduler` endpoints.
//!
//! each handler decodes a json request, calls the matching
//! [`SchedulerService`](crate::SchedulerService) operation and encodes the
//! result. binary fields travel hex-encoded.

use axum::{Json, extract::State, http::StatusCode};

use super::ApiError;
use crate::AppState;
use crate::service::{
    ChallengeRequest, ChallengeResponse, DeviceCredential, NodeInfoRequest, NodeInfoResponse,
    RecoveryRequest, RegisterRequest, ScheduleRequest,
};

/// post /scheduler/challenge
pub async fn get_challenge(
    State(state): State<AppState>,
    Json(req): Json<ChallengeRequest>,
) -> Json<ChallengeResponse> {
    Json(state.scheduler.get_challenge(req))
}

/// post /scheduler/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<DeviceCredential>, ApiError> {
    Ok(Json(state.scheduler.register(req).await?))
}

/// post /scheduler/recover
pub async fn recover(
    State(state): State<AppState>,
    Json(req): Json<RecoveryRequest>,
) -> Result<Json<DeviceCredential>, ApiError> {
    Ok(Json(state.scheduler.recover(req).await?))
}

/// post /scheduler/schedule
pub async fn schedule(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<NodeInfoResponse>, ApiError> {
    Ok(Json(state.scheduler.schedule(req).await?))
}

/// post /scheduler/node_info
///
/// with `wait` the request is held open until the node is scheduled. a
/// client that disconnects only drops its own wait.
pub async fn node_info(
    State(state): State<AppState>,
    Json(req): Json<NodeInfoRequest>,
) -> Result<Json<NodeInfoResponse>, ApiError> {
    Ok(Json(state.scheduler.get_node_info(req).await?))
}

/// post /scheduler/stop
pub async fn stop(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.stop(req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// post /scheduler/restart
pub async fn restart(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<NodeInfoResponse>, ApiError> {
    Ok(Json(state.scheduler.restart(req).await?))
}
