use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Start Lights Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::players::register_player,
        crate::routes::players::player_stats,
        crate::routes::players::player_scores,
        crate::routes::players::leaderboard,
        crate::routes::races::create_race,
        crate::routes::races::get_race,
        crate::routes::races::arm_race,
        crate::routes::races::trigger_race,
        crate::routes::races::close_race,
        crate::routes::sse::public_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::player::RegisterPlayerRequest,
            crate::dto::player::PlayerSummary,
            crate::dto::player::PlayerStatsResponse,
            crate::dto::player::ScoreRecordResponse,
            crate::dto::player::LeaderboardEntryResponse,
            crate::dto::race::CreateRaceRequest,
            crate::dto::race::RacePhaseDto,
            crate::dto::race::RaceResultDto,
            crate::dto::race::RaceSessionResponse,
            crate::dto::race::TriggerOutcomeDto,
            crate::dto::race::TriggerResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::RaceArmedEvent,
            crate::dto::sse::RaceLightEvent,
            crate::dto::sse::RaceLiveEvent,
            crate::dto::sse::RaceCompletedEvent,
            crate::dto::sse::RaceFaultedEvent,
            crate::dto::sse::ScoreRecordedEvent,
            crate::dto::sse::ScorePersistFailedEvent,
            crate::dto::ws::TriggerPadInboundMessage,
            crate::dto::ws::TriggerPadOutboundMessage,
            crate::dto::ws::TriggerPadFeedback,
            crate::state::scoring::PerformanceRating,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "players", description = "Player registry, history and leaderboard"),
        (name = "races", description = "Race sessions and reaction measurement"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "trigger-pads", description = "WebSocket operations for trigger pads"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/players",
            "/players/{id}/stats",
            "/players/{id}/scores",
            "/leaderboard",
            "/races",
            "/races/{id}",
            "/races/{id}/arm",
            "/races/{id}/trigger",
            "/sse/public",
            "/ws",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
