//! Race session use-cases and the hand-off of finalized results to persistence.

use std::{sync::Arc, time::SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{PlayerStatsEntity, ScoreRecordEntity},
    dto::race::{CreateRaceRequest, RaceResultDto, RaceSessionResponse, TriggerResponse},
    error::ServiceError,
    services::{
        player_service::{normalize_email, player_for},
        sse_events,
        submission_gate::{FinalizedResult, GateOutcome, SubmissionKey},
    },
    state::{
        SharedState,
        race::RaceSession,
        race_timer::{RaceResult, TriggerOutcome},
    },
};

/// Open an idle race session bound to a player.
pub async fn create_session(
    state: &SharedState,
    request: CreateRaceRequest,
) -> RaceSessionResponse {
    let player_id = normalize_email(&request.player_id);
    let session = state.races().create(player_id);
    info!(session_id = %session.id(), player_id = %session.player_id(), "race session opened");
    describe(&session).await
}

fn find_session(state: &SharedState, session_id: Uuid) -> Result<Arc<RaceSession>, ServiceError> {
    state
        .races()
        .get(&session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("race session `{session_id}`")))
}

async fn describe(session: &RaceSession) -> RaceSessionResponse {
    RaceSessionResponse::new(
        session.id(),
        session.player_id(),
        session.light_count().await,
        session.snapshot().await,
    )
}

/// Current state of a session.
pub async fn snapshot(
    state: &SharedState,
    session_id: Uuid,
) -> Result<RaceSessionResponse, ServiceError> {
    let session = find_session(state, session_id)?;
    Ok(describe(&session).await)
}

/// Start (or restart) the light sequence.
pub async fn arm(state: &SharedState, session_id: Uuid) -> Result<RaceSessionResponse, ServiceError> {
    let session = find_session(state, session_id)?;
    let plan = session.arm().await;
    info!(session_id = %session_id, epoch = plan.epoch, "race armed");
    Ok(describe(&session).await)
}

/// Deliver a trigger signal; a completed race is handed to persistence in the background.
pub async fn trigger(state: &SharedState, session_id: Uuid) -> Result<TriggerResponse, ServiceError> {
    let session = find_session(state, session_id)?;
    let outcome = session.trigger().await;

    let result = match &outcome {
        TriggerOutcome::Completed(result) => {
            info!(
                session_id = %session_id,
                reaction_time_ms = result.reaction_time_ms,
                score = result.score,
                "race completed"
            );
            spawn_persist(state.clone(), &session, *result);
            Some(RaceResultDto::from(*result))
        }
        TriggerOutcome::Faulted => {
            info!(session_id = %session_id, "false start");
            None
        }
        _ => None,
    };

    Ok(TriggerResponse {
        outcome: (&outcome).into(),
        result,
        session: describe(&session).await,
    })
}

/// Close a session, cancelling whatever is scheduled for it.
pub fn close(state: &SharedState, session_id: Uuid) -> Result<(), ServiceError> {
    state
        .races()
        .remove(&session_id)
        .map(|_| info!(session_id = %session_id, "race session closed"))
        .ok_or_else(|| ServiceError::NotFound(format!("race session `{session_id}`")))
}

fn spawn_persist(state: SharedState, session: &RaceSession, result: RaceResult) {
    let finalized = FinalizedResult {
        player_id: session.player_id().to_string(),
        reaction_time_ms: result.reaction_time_ms,
        score: result.score,
        finalized_at: SystemTime::now(),
    };
    let lights = state.races().config().light_count();
    tokio::spawn(async move {
        persist_result(&state, finalized, lights).await;
    });
}

/// Push a finalized result through the dedupe gate into the active score store.
///
/// Failures are logged and broadcast; they never affect the race outcome.
pub async fn persist_result(
    state: &SharedState,
    finalized: FinalizedResult,
    lights: u8,
) -> Option<GateOutcome<PlayerStatsEntity>> {
    let key = SubmissionKey::derive(&finalized);
    let record = ScoreRecordEntity {
        id: key.as_uuid(),
        player_id: finalized.player_id.clone(),
        reaction_time_ms: finalized.reaction_time_ms,
        score: finalized.score,
        lights,
        finalized_at: finalized.finalized_at,
    };

    let outcome = state
        .submissions()
        .submit(key, || store_record(state, record.clone()))
        .await;

    match outcome {
        Ok(GateOutcome::Submitted(stats)) => {
            info!(
                record_id = %record.id,
                player_id = %record.player_id,
                total_games = stats.total_games,
                "score recorded"
            );
            sse_events::broadcast_score_recorded(state, &record, stats.clone());
            Some(GateOutcome::Submitted(stats))
        }
        Ok(GateOutcome::Duplicate) => Some(GateOutcome::Duplicate),
        Err(err) => {
            warn!(
                record_id = %record.id,
                player_id = %record.player_id,
                error = %err,
                "failed to persist race result"
            );
            sse_events::broadcast_score_persist_failed(state, &record, &err);
            None
        }
    }
}

async fn store_record(
    state: &SharedState,
    record: ScoreRecordEntity,
) -> Result<PlayerStatsEntity, ServiceError> {
    let store = state.require_score_store().await?;
    store
        .register_player(player_for(&record.player_id, None))
        .await?;
    Ok(store.record_score(record).await?)
}
