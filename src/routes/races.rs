use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::race::{CreateRaceRequest, RaceSessionResponse, TriggerResponse},
    error::AppError,
    services::race_service,
    state::SharedState,
};

/// Race session lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/races", post(create_race))
        .route("/races/{id}", get(get_race).delete(close_race))
        .route("/races/{id}/arm", post(arm_race))
        .route("/races/{id}/trigger", post(trigger_race))
}

/// Open an idle race session for a player.
#[utoipa::path(
    post,
    path = "/races",
    tag = "races",
    request_body = CreateRaceRequest,
    responses(
        (status = 201, description = "Session opened", body = RaceSessionResponse),
        (status = 400, description = "Invalid player e-mail")
    )
)]
pub async fn create_race(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRaceRequest>>,
) -> (StatusCode, Json<RaceSessionResponse>) {
    let session = race_service::create_session(&state, payload).await;
    (StatusCode::CREATED, Json(session))
}

/// Current state of a race session.
#[utoipa::path(
    get,
    path = "/races/{id}",
    tag = "races",
    params(("id" = Uuid, Path, description = "Race session identifier")),
    responses(
        (status = 200, description = "Session state", body = RaceSessionResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_race(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RaceSessionResponse>, AppError> {
    Ok(Json(race_service::snapshot(&state, id).await?))
}

/// Start the light sequence, restarting it when one is already running.
#[utoipa::path(
    post,
    path = "/races/{id}/arm",
    tag = "races",
    params(("id" = Uuid, Path, description = "Race session identifier")),
    responses(
        (status = 200, description = "Lights armed", body = RaceSessionResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn arm_race(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RaceSessionResponse>, AppError> {
    Ok(Json(race_service::arm(&state, id).await?))
}

/// Deliver the player's reaction signal.
#[utoipa::path(
    post,
    path = "/races/{id}/trigger",
    tag = "races",
    params(("id" = Uuid, Path, description = "Race session identifier")),
    responses(
        (status = 200, description = "Trigger outcome", body = TriggerResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn trigger_race(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TriggerResponse>, AppError> {
    Ok(Json(race_service::trigger(&state, id).await?))
}

/// Close a session and cancel its pending lights.
#[utoipa::path(
    delete,
    path = "/races/{id}",
    tag = "races",
    params(("id" = Uuid, Path, description = "Race session identifier")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn close_race(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    race_service::close(&state, id)?;
    Ok(StatusCode::NO_CONTENT)
}
