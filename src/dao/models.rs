use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Registered player, identified by a normalised e-mail address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Normalised e-mail address used as identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// First registration.
    pub registered_at: SystemTime,
    /// Last finalized race, if any.
    pub last_played: Option<SystemTime>,
}

impl PlayerEntity {
    /// Fresh player registered now.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            registered_at: SystemTime::now(),
            last_played: None,
        }
    }
}

/// Finalized race result handed over to persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreRecordEntity {
    /// Derived submission identity; storing the same id twice is a no-op.
    pub id: Uuid,
    /// Owner of the record.
    pub player_id: String,
    /// Measured reaction time.
    pub reaction_time_ms: u64,
    /// Points awarded.
    pub score: u32,
    /// Number of lights in the start sequence.
    pub lights: u8,
    /// Instant the race was resolved.
    pub finalized_at: SystemTime,
}

/// Aggregate statistics computed over a player's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatsEntity {
    /// Player the statistics belong to.
    pub player_id: String,
    /// Number of recorded races.
    pub total_games: u64,
    /// Highest score reached.
    pub best_score: u32,
    /// Fastest reaction, absent until the first race.
    pub best_reaction_time_ms: Option<u64>,
    /// Mean reaction time.
    pub average_reaction_time_ms: f64,
    /// Mean score.
    pub average_score: f64,
    /// Older-half mean minus newer-half mean; positive means getting faster.
    pub improvement_ms: f64,
    /// Standard deviation of reaction times.
    pub consistency_ms: f64,
    /// Most recent race.
    pub last_played: Option<SystemTime>,
}

/// Row of the global leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntryEntity {
    /// Player identity.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Highest score reached.
    pub best_score: u32,
    /// Fastest reaction.
    pub best_reaction_time_ms: Option<u64>,
    /// Number of recorded races.
    pub total_games: u64,
}
