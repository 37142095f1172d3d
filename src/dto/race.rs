use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::validate_player_email,
    state::{
        race_timer::{RacePhase, RaceResult, RaceSnapshot, TriggerOutcome},
        scoring::PerformanceRating,
    },
};

/// Payload opening a race session for a player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRaceRequest {
    /// Player e-mail the results will be recorded under.
    #[validate(custom(function = "validate_player_email"))]
    pub player_id: String,
}

/// Serialized [`RacePhase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RacePhaseDto {
    Idle,
    Arming,
    Live,
    Completed,
    Faulted,
}

impl From<RacePhase> for RacePhaseDto {
    fn from(value: RacePhase) -> Self {
        match value {
            RacePhase::Idle => Self::Idle,
            RacePhase::Arming => Self::Arming,
            RacePhase::Live => Self::Live,
            RacePhase::Completed => Self::Completed,
            RacePhase::Faulted => Self::Faulted,
        }
    }
}

/// A measured reaction with its rating.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RaceResultDto {
    pub reaction_time_ms: u64,
    pub score: u32,
    pub rating: PerformanceRating,
    pub message: String,
}

impl From<RaceResult> for RaceResultDto {
    fn from(value: RaceResult) -> Self {
        let rating = PerformanceRating::from_reaction_ms(value.reaction_time_ms);
        Self {
            reaction_time_ms: value.reaction_time_ms,
            score: value.score,
            rating,
            message: rating.message().to_string(),
        }
    }
}

/// Current state of a race session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RaceSessionResponse {
    pub session_id: Uuid,
    pub player_id: String,
    pub phase: RacePhaseDto,
    /// Lights currently on.
    pub light_stage: u8,
    /// Lights in the sequence.
    pub light_count: u8,
    pub epoch: u64,
    pub last_result: Option<RaceResultDto>,
}

impl RaceSessionResponse {
    /// Build the response from a session snapshot.
    pub fn new(session_id: Uuid, player_id: &str, light_count: u8, snapshot: RaceSnapshot) -> Self {
        Self {
            session_id,
            player_id: player_id.to_string(),
            phase: snapshot.phase.into(),
            light_stage: snapshot.light_stage,
            light_count,
            epoch: snapshot.epoch,
            last_result: snapshot.last_result.map(Into::into),
        }
    }
}

/// What a trigger signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcomeDto {
    /// The session was idle; the lights started.
    Started,
    /// False start.
    Faulted,
    /// Reaction measured.
    Completed,
    /// Trigger timestamp preceded lights out.
    Discarded,
    /// Race already resolved.
    Ignored,
}

impl From<&TriggerOutcome> for TriggerOutcomeDto {
    fn from(value: &TriggerOutcome) -> Self {
        match value {
            TriggerOutcome::Started(_) => Self::Started,
            TriggerOutcome::Faulted => Self::Faulted,
            TriggerOutcome::Completed(_) => Self::Completed,
            TriggerOutcome::Discarded => Self::Discarded,
            TriggerOutcome::Ignored => Self::Ignored,
        }
    }
}

/// Answer to a trigger signal.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TriggerResponse {
    pub outcome: TriggerOutcomeDto,
    /// Result measured by this very trigger.
    pub result: Option<RaceResultDto>,
    pub session: RaceSessionResponse,
}
