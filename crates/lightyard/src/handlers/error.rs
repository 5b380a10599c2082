//! api error handling for http handlers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::Error;

/// api error type for handler responses
#[derive(Debug)]
pub enum ApiError {
    /// bad request (400)
    BadRequest(String),
    /// unauthorized (401)
    Unauthorized(String),
    /// not found (404)
    NotFound(String),
    /// conflict (409)
    Conflict(String),
    /// unprocessable entity (422)
    Unprocessable(String),
    /// internal server error (500)
    Internal(String),
    /// service unavailable (503)
    Unavailable(String),
    /// gateway timeout (504)
    Timeout(String),
}

/// json error body
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// create internal server error from any error type
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }

    /// create not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub(crate) fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "invalid_argument", m),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthenticated", m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, "already_exists", m),
            ApiError::Unprocessable(m) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "failed_precondition", m)
            }
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m),
            ApiError::Timeout(m) => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ErrorBody {
            code,
            message: message.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        use lightyard_ca::Error as CaError;
        use lightyard_state::Error as StateError;

        let message = e.to_string();
        match e {
            Error::State(
                StateError::ChallengeNotFound { .. } | StateError::InvalidSignature(_),
            )
            | Error::InvalidSignature(_)
            | Error::UntrustedApprover(_)
            | Error::InvalidInviteCode => Self::Unauthorized(message),
            Error::State(StateError::NodeNotFound(_) | StateError::WebhookNotFound { .. })
            | Error::PairingSessionNotFound(_) => Self::NotFound(message),
            Error::State(StateError::NodeAlreadyExists(_)) | Error::Ca(CaError::AlreadyIssued(_)) => {
                Self::Conflict(message)
            }
            Error::State(StateError::InvalidArgument(_))
            | Error::Ca(CaError::InvalidCsr(_) | CaError::InvalidPath(_))
            | Error::Types(_)
            | Error::InvalidArgument(_) => Self::BadRequest(message),
            Error::UnknownSignerVersion(_) => Self::Unprocessable(message),
            Error::SchedulingTimeout { .. } | Error::PairingExpired(_) => Self::Timeout(message),
            Error::SignerNotConnected(_) | Error::ShuttingDown => Self::Unavailable(message),
            _ => {
                tracing::error!(error = %message, "request failed");
                Self::Internal(message)
            }
        }
    }
}

/// extension trait for converting results to apierror
pub trait ResultExt<T> {
    /// convert error to internal server error
    fn map_internal(self) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn map_internal(self) -> Result<T, ApiError> {
        self.map_err(ApiError::internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightyard_types::{ChallengeScope, NodeId};
    use std::time::Duration;

    fn status(e: Error) -> StatusCode {
        ApiError::from(e).parts().0
    }

    #[test]
    fn test_status_mapping() {
        let node_id = NodeId::from_slice(&[0x02; 33]).unwrap();
        let state = |e| Error::State(e);

        assert_eq!(
            status(state(lightyard_state::Error::ChallengeNotFound {
                node_id,
                scope: ChallengeScope::Register
            })),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status(Error::InvalidInviteCode), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(state(lightyard_state::Error::NodeNotFound(node_id))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(state(lightyard_state::Error::NodeAlreadyExists(node_id))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(Error::UnknownSignerVersion("v0".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(Error::SchedulingTimeout {
                node_id: node_id.to_string(),
                timeout: Duration::from_secs(1)
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(Error::SignerNotConnected("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(Error::UntrustedApprover("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status(Error::ShuttingDown), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(Error::Configuration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let response = ApiError::not_found("node 02 not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["message"], "node 02 not found");
    }
}
