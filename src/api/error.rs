use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::engine::{EngineError, Policy};
use crate::webhook::{ReconcileError, SignatureError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

fn body(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

fn internal(err: &dyn std::error::Error) -> Response {
    error!(error = %err, "request failed");
    body(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal server error")
}

fn engine_response(err: &EngineError) -> Response {
    match err {
        EngineError::NotFound { kind, .. } => body(StatusCode::NOT_FOUND, "not_found", &format!("{kind} not found")),
        EngineError::AlreadyExists(_) => body(StatusCode::CONFLICT, "already_exists", "already exists"),
        EngineError::Conflict(_) => body(StatusCode::CONFLICT, "conflict", "requested time is no longer available"),
        EngineError::Policy(Policy::NotOwner) => body(StatusCode::FORBIDDEN, "forbidden", &Policy::NotOwner.to_string()),
        EngineError::Policy(p) => body(StatusCode::BAD_REQUEST, "policy", &p.to_string()),
        EngineError::PaymentRequired { amount_owed } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "error": "payment_required",
                "message": "settle your balance before leaving",
                "amount_owed": amount_owed,
            })),
        )
            .into_response(),
        EngineError::LimitExceeded(what) => body(StatusCode::BAD_REQUEST, "limit_exceeded", what),
        EngineError::Integrity(_) | EngineError::WalError(_) => internal(err),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::NotAuthenticated => body(StatusCode::UNAUTHORIZED, "not_authenticated", "missing or invalid x-user-id"),
            ApiError::Signature(_) => body(StatusCode::UNAUTHORIZED, "invalid_signature", "invalid webhook signature"),
            ApiError::BadRequest(msg) => body(StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Engine(e) => engine_response(e),
            ApiError::Reconcile(ReconcileError::Malformed(msg)) => body(StatusCode::BAD_REQUEST, "malformed_event", msg),
            // Any other webhook failure asks the gateway to redeliver.
            ApiError::Reconcile(e) => internal(e),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
