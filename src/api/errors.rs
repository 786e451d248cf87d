//! Operator-facing API error rendering
//!
//! Webhook responses are rendered by each aggregator's own codec; this
//! type covers the platform endpoints (launch, catalog, freespins),
//! where the caller is the operator and a plain HTTP status plus a
//! structured body is the right shape.

use crate::errors::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Engine error paired with the request id for response rendering.
#[derive(Debug)]
pub struct ApiError {
    pub inner: EngineError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(request_id: String, inner: EngineError) -> Self {
        Self { inner, request_id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.inner {
            EngineError::NotFound(_) | EngineError::RoundNotFound(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            EngineError::SessionInvalid => (StatusCode::UNAUTHORIZED, "SESSION_INVALID"),
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
            EngineError::InvalidPreset { .. } => (StatusCode::BAD_REQUEST, "INVALID_PRESET"),
            EngineError::InsufficientBalance { .. } => {
                (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE")
            }
            EngineError::BetLimitExceeded { .. } => (StatusCode::BAD_REQUEST, "BET_LIMIT"),
            EngineError::RoundFinished { .. } => (StatusCode::CONFLICT, "ROUND_FINISHED"),
            EngineError::DuplicateEntity(_) | EngineError::IllegalState(_) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            EngineError::AggregatorNotSupported(_) => {
                (StatusCode::NOT_FOUND, "AGGREGATOR_NOT_SUPPORTED")
            }
            EngineError::GameUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "GAME_UNAVAILABLE"),
            EngineError::ExternalService { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILURE"),
        };
        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: code.to_string(),
                message: self.inner.to_string(),
            },
        });
        (status, body).into_response()
    }
}
