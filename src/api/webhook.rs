//! POST /webhooks/payment. Takes the raw body so the signature covers exactly what was sent.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::observability::WEBHOOK_SIGNATURE_FAILURES_TOTAL;
use crate::webhook::{SIGNATURE_HEADER, parse_event};

use super::{ApiResult, AppState};

pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<Value>> {
    let now = state.now();
    let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = state.verifier.verify(header, &body, now / 1000) {
        warn!(error = %e, "webhook signature verification failed");
        metrics::counter!(WEBHOOK_SIGNATURE_FAILURES_TOTAL).increment(1);
        return Err(e.into());
    }

    let event = parse_event(&body)?;
    info!(event_id = %event.id, kind = event.kind.as_str(), "webhook received");
    let outcome = state.reconciler.handle(&event, now).await?;
    info!(event_id = %event.id, outcome = outcome.as_str(), "webhook handled");
    Ok(Json(json!({ "received": true })))
}
