//! health check endpoint handler

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// health check response body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

/// content-type for health check responses per rfc 8040
const HEALTH_CONTENT_TYPE: &str = "application/health+json; charset=utf-8";

/// get /health - liveness check
///
/// the server keeps no external dependencies to ping, so answering at all
/// means it is alive.
pub async fn health() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HEALTH_CONTENT_TYPE)],
        Json(HealthResponse { status: "pass" }),
    )
        .into_response()
}
