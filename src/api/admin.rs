//! Seeding and staff routes: venues, courts, cash payments, attendance.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::hours::OperatingHours;
use crate::model::{Court, Venue};

use super::{Ack, ApiResult, AppState, Created, ack};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "courtside",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
pub struct NewVenue {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    utc_offset_minutes: i32,
    hours: OperatingHours,
}

pub async fn register_venue(
    State(state): State<AppState>,
    Json(body): Json<NewVenue>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let id = Ulid::new();
    state
        .engine
        .register_venue(Venue {
            id,
            name: body.name,
            utc_offset_minutes: body.utc_offset_minutes,
            hours: body.hours,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
pub struct NewCourt {
    venue_id: Ulid,
    #[serde(default)]
    name: Option<String>,
    hourly_rate: Decimal,
    #[serde(default = "default_active")]
    active: bool,
}

pub async fn register_court(
    State(state): State<AppState>,
    Json(body): Json<NewCourt>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let id = Ulid::new();
    state
        .engine
        .register_court(Court {
            id,
            venue_id: body.venue_id,
            name: body.name,
            hourly_rate: body.hourly_rate,
            active: body.active,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

#[derive(Deserialize)]
pub struct CourtUpdate {
    hourly_rate: Decimal,
    active: bool,
}

pub async fn update_court(
    State(state): State<AppState>,
    Path(court_id): Path<Ulid>,
    Json(body): Json<CourtUpdate>,
) -> ApiResult<Json<Ack>> {
    state
        .engine
        .update_court(court_id, body.hourly_rate, body.active)
        .await?;
    Ok(ack())
}

#[derive(Deserialize)]
pub struct CashPayment {
    amount: Decimal,
}

pub async fn confirm_cash(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<CashPayment>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let payment_id = state
        .engine
        .confirm_cash_payment(id, body.amount, state.now())
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id: payment_id })))
}

#[derive(Deserialize)]
pub struct Attendance {
    attended: bool,
}

pub async fn mark_attendance(
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<Attendance>,
) -> ApiResult<Json<Ack>> {
    state
        .engine
        .mark_attendance(id, body.attended, state.now())
        .await?;
    Ok(ack())
}
