//! HTTP surface: axum routes over the engine and the webhook reconciler.

mod admin;
mod error;
mod queue;
mod reservations;
mod webhook;

pub use error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::{Engine, now_ms};
use crate::gateway::PaymentGateway;
use crate::model::Ms;
use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL, route_label};
use crate::webhook::{Reconciler, SignatureVerifier};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub reconciler: Arc<Reconciler>,
    pub verifier: Arc<SignatureVerifier>,
    /// Source of "now" for every request.
    pub clock: fn() -> Ms,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, gateway: Arc<dyn PaymentGateway>, verifier: SignatureVerifier) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(engine.clone(), gateway)),
            engine,
            verifier: Arc::new(verifier),
            clock: now_ms,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> Ms) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn now(&self) -> Ms {
        (self.clock)()
    }
}

/// Caller identity from the upstream identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Ulid);

fn user_from_parts(parts: &Parts) -> Option<Ulid> {
    parts
        .headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_parts(parts).map(UserId).ok_or(ApiError::NotAuthenticated)
    }
}

/// Caller identity when the route also serves anonymous callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybeUser(pub Option<Ulid>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(USER_HEADER) {
            None => Ok(MaybeUser(None)),
            Some(_) => user_from_parts(parts)
                .map(|id| MaybeUser(Some(id)))
                .ok_or(ApiError::NotAuthenticated),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct Created {
    pub id: Ulid,
}

#[derive(Serialize)]
pub(crate) struct Ack {
    pub ok: bool,
}

pub(crate) fn ack() -> Json<Ack> {
    Json(Ack { ok: true })
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = route_label(req.uri().path());
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route).record(started.elapsed().as_secs_f64());
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route, "status" => response.status().as_u16().to_string())
        .increment(1);
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/venues", post(admin::register_venue))
        .route("/courts", post(admin::register_court))
        .route("/courts/{court_id}", post(admin::update_court))
        .route("/courts/{court_id}/slots", get(reservations::slots))
        .route("/reservations", post(reservations::create))
        .route("/reservations/{id}", get(reservations::show))
        .route("/reservations/{id}/cancel", post(reservations::cancel))
        .route("/reservations/{id}/payments", post(reservations::create_payment))
        .route("/reservations/{id}/cash", post(admin::confirm_cash))
        .route("/reservations/{id}/attendance", post(admin::mark_attendance))
        .route("/webhooks/payment", post(webhook::receive))
        .route("/queue-sessions", post(queue::create_session))
        .route("/queue/{session_id}", get(queue::standings))
        .route("/queue/{session_id}/join", post(queue::join))
        .route("/queue/{session_id}/leave", post(queue::leave))
        .route("/queue/{session_id}/status", post(queue::set_status))
        .route("/queue/{session_id}/games", post(queue::record_game))
        .route("/queue/{session_id}/settle", post(queue::settle))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
