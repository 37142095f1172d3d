use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{LeaderboardEntryEntity, PlayerEntity, PlayerStatsEntity, ScoreRecordEntity},
    dto::{
        format_system_time,
        validation::{validate_display_name, validate_player_email},
    },
    state::scoring::PerformanceRating,
};

/// Default number of rows returned by listing endpoints.
pub const DEFAULT_LIMIT: usize = 10;
/// Upper bound accepted for `limit`.
pub const MAX_LIMIT: usize = 100;

/// Payload used to register (or look up) a player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RegisterPlayerRequest {
    /// E-mail address; trimmed and lower-cased before use.
    #[validate(custom(function = "validate_player_email"))]
    pub email: String,
    /// Display name. Derived from the e-mail local part when omitted.
    #[serde(default)]
    #[validate(custom(function = "validate_display_name"))]
    pub name: Option<String>,
}

/// `?limit=` query accepted by listing endpoints.
#[derive(Debug, Default, Deserialize, IntoParams, Validate)]
pub struct LimitQuery {
    /// Rows to return (1..=100, default 10).
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
}

impl LimitQuery {
    /// Requested limit with the default applied.
    pub fn resolve(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Public view of a registered player.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerSummary {
    pub id: String,
    pub name: String,
    /// RFC 3339 timestamp.
    pub registered_at: String,
    /// RFC 3339 timestamp of the latest recorded race.
    pub last_played: Option<String>,
}

impl From<PlayerEntity> for PlayerSummary {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            registered_at: format_system_time(value.registered_at),
            last_played: value.last_played.map(format_system_time),
        }
    }
}

/// Aggregate statistics of a player.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerStatsResponse {
    pub player_id: String,
    pub total_games: u64,
    pub best_score: u32,
    pub best_reaction_time_ms: Option<u64>,
    pub average_reaction_time_ms: f64,
    pub average_score: f64,
    /// Positive when the recent half of the history is faster than the older half.
    pub improvement_ms: f64,
    /// Standard deviation of reaction times.
    pub consistency_ms: f64,
    pub last_played: Option<String>,
    /// Rating of the best reaction, absent before the first race.
    pub best_rating: Option<PerformanceRating>,
}

impl From<PlayerStatsEntity> for PlayerStatsResponse {
    fn from(value: PlayerStatsEntity) -> Self {
        Self {
            best_rating: value
                .best_reaction_time_ms
                .map(PerformanceRating::from_reaction_ms),
            player_id: value.player_id,
            total_games: value.total_games,
            best_score: value.best_score,
            best_reaction_time_ms: value.best_reaction_time_ms,
            average_reaction_time_ms: value.average_reaction_time_ms,
            average_score: value.average_score,
            improvement_ms: value.improvement_ms,
            consistency_ms: value.consistency_ms,
            last_played: value.last_played.map(format_system_time),
        }
    }
}

/// One stored race result.
#[derive(Debug, Serialize, ToSchema)]
pub struct ScoreRecordResponse {
    pub id: Uuid,
    pub reaction_time_ms: u64,
    pub score: u32,
    pub lights: u8,
    pub rating: PerformanceRating,
    /// RFC 3339 timestamp.
    pub finalized_at: String,
}

impl From<ScoreRecordEntity> for ScoreRecordResponse {
    fn from(value: ScoreRecordEntity) -> Self {
        Self {
            id: value.id,
            reaction_time_ms: value.reaction_time_ms,
            score: value.score,
            lights: value.lights,
            rating: PerformanceRating::from_reaction_ms(value.reaction_time_ms),
            finalized_at: format_system_time(value.finalized_at),
        }
    }
}

/// Row of the global leaderboard.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardEntryResponse {
    /// 1-based position.
    pub rank: usize,
    pub player_id: String,
    pub name: String,
    pub best_score: u32,
    pub best_reaction_time_ms: Option<u64>,
    pub total_games: u64,
}

impl From<(usize, LeaderboardEntryEntity)> for LeaderboardEntryResponse {
    fn from((index, value): (usize, LeaderboardEntryEntity)) -> Self {
        Self {
            rank: index + 1,
            player_id: value.player_id,
            name: value.name,
            best_score: value.best_score,
            best_reaction_time_ms: value.best_reaction_time_ms,
            total_games: value.total_games,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_bounds() {
        assert_eq!(LimitQuery::default().resolve(), DEFAULT_LIMIT);
        assert_eq!(LimitQuery { limit: Some(25) }.resolve(), 25);
        assert!(LimitQuery { limit: Some(0) }.validate().is_err());
        assert!(LimitQuery { limit: Some(101) }.validate().is_err());
    }

    #[test]
    fn register_request_validation() {
        let valid = RegisterPlayerRequest {
            email: "driver@gmail.com".into(),
            name: None,
        };
        assert!(valid.validate().is_ok());

        let invalid = RegisterPlayerRequest {
            email: "not-an-email".into(),
            name: Some("  ".into()),
        };
        let errors = invalid.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
        assert!(errors.field_errors().contains_key("name"));
    }
}
