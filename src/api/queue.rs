use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::{Ms, QueueStandings, SessionStatus};

use super::{Ack, ApiResult, AppState, Created, MaybeUser, UserId, ack};

#[derive(Deserialize)]
pub struct NewSession {
    court_id: Ulid,
    start: Ms,
    end: Ms,
    max_players: u32,
    cost_per_game: Decimal,
}

pub async fn create_session(
    State(state): State<AppState>,
    UserId(organizer_id): UserId,
    Json(body): Json<NewSession>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let id = state
        .engine
        .create_queue_session(
            body.court_id,
            organizer_id,
            body.start,
            body.end,
            body.max_players,
            body.cost_per_game,
            state.now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

pub async fn standings(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(session_id): Path<Ulid>,
) -> ApiResult<Json<QueueStandings>> {
    Ok(Json(state.engine.queue_standings(session_id, viewer).await?))
}

/// Join and report where the caller landed.
pub async fn join(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(session_id): Path<Ulid>,
) -> ApiResult<Json<QueueStandings>> {
    state
        .engine
        .join_queue(session_id, user_id, state.now())
        .await?;
    Ok(Json(state.engine.queue_standings(session_id, Some(user_id)).await?))
}

pub async fn leave(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(session_id): Path<Ulid>,
) -> ApiResult<Json<Ack>> {
    state
        .engine
        .leave_queue(session_id, user_id, state.now())
        .await?;
    Ok(ack())
}

#[derive(Deserialize)]
pub struct StatusChange {
    status: SessionStatus,
}

pub async fn set_status(
    State(state): State<AppState>,
    Path(session_id): Path<Ulid>,
    Json(body): Json<StatusChange>,
) -> ApiResult<Json<Ack>> {
    state
        .engine
        .set_session_status(session_id, body.status)
        .await?;
    Ok(ack())
}

#[derive(Deserialize)]
pub struct Game {
    players: Vec<Ulid>,
    #[serde(default)]
    winners: Vec<Ulid>,
}

pub async fn record_game(
    State(state): State<AppState>,
    Path(session_id): Path<Ulid>,
    Json(body): Json<Game>,
) -> ApiResult<Json<Ack>> {
    state
        .engine
        .record_game(session_id, body.players, body.winners)
        .await?;
    Ok(ack())
}

#[derive(Deserialize)]
pub struct Settlement {
    user_id: Ulid,
}

pub async fn settle(
    State(state): State<AppState>,
    Path(session_id): Path<Ulid>,
    Json(body): Json<Settlement>,
) -> ApiResult<Json<Ack>> {
    state
        .engine
        .settle_participant(session_id, body.user_id)
        .await?;
    Ok(ack())
}
