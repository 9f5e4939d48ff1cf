use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::engine::Policy;
use crate::model::{Actor, Ms, Reservation, Slot};

use super::{Ack, ApiError, ApiResult, AppState, Created, UserId, ack};

#[derive(Deserialize)]
pub struct SlotQuery {
    date: String,
}

pub async fn slots(
    State(state): State<AppState>,
    Path(court_id): Path<Ulid>,
    Query(query): Query<SlotQuery>,
) -> ApiResult<Json<Vec<Slot>>> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date {:?}, expected YYYY-MM-DD", query.date)))?;
    let slots = state
        .engine
        .available_slots(court_id, date, state.now())
        .await?;
    Ok(Json(slots))
}

#[derive(Deserialize)]
pub struct NewReservation {
    court_id: Ulid,
    start: Ms,
    end: Ms,
    total_amount: Decimal,
}

pub async fn create(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<NewReservation>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let id = state
        .engine
        .create_reservation(body.court_id, user_id, body.start, body.end, body.total_amount, state.now())
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

/// The caller's own reservation.
async fn owned(state: &AppState, id: Ulid, user_id: Ulid) -> ApiResult<Reservation> {
    let reservation = state.engine.get_reservation(id).await?;
    if reservation.user_id != user_id {
        return Err(ApiError::Engine(Policy::NotOwner.into()));
    }
    Ok(reservation)
}

pub async fn show(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<Ulid>,
) -> ApiResult<Json<Reservation>> {
    Ok(Json(owned(&state, id, user_id).await?))
}

#[derive(Deserialize)]
pub struct Cancellation {
    #[serde(default)]
    reason: String,
}

pub async fn cancel(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<Ulid>,
    Json(body): Json<Cancellation>,
) -> ApiResult<Json<Ack>> {
    state
        .engine
        .cancel_reservation(id, Actor::User(user_id), body.reason, state.now())
        .await?;
    Ok(ack())
}

#[derive(Deserialize)]
pub struct NewPayment {
    #[serde(default)]
    source_id: Option<String>,
    amount: Decimal,
}

pub async fn create_payment(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<Ulid>,
    Json(body): Json<NewPayment>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    owned(&state, id, user_id).await?;
    let payment_id = state
        .engine
        .create_payment(id, body.source_id, body.amount, state.now())
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id: payment_id })))
}
