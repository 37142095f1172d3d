use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::player::{
        LeaderboardEntryResponse, LimitQuery, PlayerStatsResponse, PlayerSummary,
        RegisterPlayerRequest, ScoreRecordResponse,
    },
    error::AppError,
    services::player_service,
    state::SharedState,
};

/// Player registry, history and leaderboard endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/players", post(register_player))
        .route("/players/{id}/stats", get(player_stats))
        .route("/players/{id}/scores", get(player_scores))
        .route("/leaderboard", get(leaderboard))
}

/// Register a player by e-mail; registering twice returns the stored player.
#[utoipa::path(
    post,
    path = "/players",
    tag = "players",
    request_body = RegisterPlayerRequest,
    responses(
        (status = 201, description = "Player registered", body = PlayerSummary),
        (status = 400, description = "Invalid e-mail or name"),
        (status = 503, description = "No score store available")
    )
)]
pub async fn register_player(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RegisterPlayerRequest>>,
) -> Result<(StatusCode, Json<PlayerSummary>), AppError> {
    let summary = player_service::register(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Aggregate statistics of a player.
#[utoipa::path(
    get,
    path = "/players/{id}/stats",
    tag = "players",
    params(("id" = String, Path, description = "Player e-mail")),
    responses(
        (status = 200, description = "Player statistics", body = PlayerStatsResponse),
        (status = 404, description = "Unknown player"),
        (status = 503, description = "No score store available")
    )
)]
pub async fn player_stats(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PlayerStatsResponse>, AppError> {
    Ok(Json(player_service::stats(&state, &id).await?))
}

/// Best results of a player.
#[utoipa::path(
    get,
    path = "/players/{id}/scores",
    tag = "players",
    params(("id" = String, Path, description = "Player e-mail"), LimitQuery),
    responses(
        (status = 200, description = "Best records, best first", body = [ScoreRecordResponse]),
        (status = 404, description = "Unknown player"),
        (status = 503, description = "No score store available")
    )
)]
pub async fn player_scores(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Query(query)): Valid<Query<LimitQuery>>,
) -> Result<Json<Vec<ScoreRecordResponse>>, AppError> {
    Ok(Json(
        player_service::top_scores(&state, &id, query.resolve()).await?,
    ))
}

/// Best players overall.
#[utoipa::path(
    get,
    path = "/leaderboard",
    tag = "players",
    params(LimitQuery),
    responses(
        (status = 200, description = "Leaderboard, best first", body = [LeaderboardEntryResponse]),
        (status = 503, description = "No score store available")
    )
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<LimitQuery>>,
) -> Result<Json<Vec<LeaderboardEntryResponse>>, AppError> {
    Ok(Json(player_service::leaderboard(&state, query.resolve()).await?))
}
