use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{player::PlayerStatsResponse, race::RaceResultDto},
    state::scoring::PerformanceRating,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Raw event with a preformatted data field.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a score store.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// A light sequence started.
pub struct RaceArmedEvent {
    pub session_id: Uuid,
    pub player_id: String,
    pub epoch: u64,
    pub light_count: u8,
    pub light_interval_ms: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// One more light is on.
pub struct RaceLightEvent {
    pub session_id: Uuid,
    pub epoch: u64,
    pub stage: u8,
}

#[derive(Debug, Serialize, ToSchema)]
/// Lights out: the reaction window is open.
pub struct RaceLiveEvent {
    pub session_id: Uuid,
    pub epoch: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// A valid reaction was measured.
pub struct RaceCompletedEvent {
    pub session_id: Uuid,
    pub player_id: String,
    pub epoch: u64,
    pub result: RaceResultDto,
}

#[derive(Debug, Serialize, ToSchema)]
/// The player jumped the start.
pub struct RaceFaultedEvent {
    pub session_id: Uuid,
    pub player_id: String,
    pub epoch: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// A finalized result reached the score store.
pub struct ScoreRecordedEvent {
    pub record_id: Uuid,
    pub player_id: String,
    pub reaction_time_ms: u64,
    pub score: u32,
    pub rating: PerformanceRating,
    pub stats: PlayerStatsResponse,
}

#[derive(Debug, Serialize, ToSchema)]
/// A finalized result could not be persisted; the race outcome itself stands.
pub struct ScorePersistFailedEvent {
    pub record_id: Uuid,
    pub player_id: String,
    pub reaction_time_ms: u64,
    pub score: u32,
    pub reason: String,
}
