use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::{
    dao::models::{PlayerStatsEntity, ScoreRecordEntity},
    dto::sse::{
        RaceArmedEvent, RaceCompletedEvent, RaceFaultedEvent, RaceLightEvent, RaceLiveEvent,
        ScorePersistFailedEvent, ScoreRecordedEvent, ServerEvent, SystemStatus,
    },
    error::ServiceError,
    state::{
        SharedState,
        race::{RaceNotice, RaceNoticeKind},
        scoring::PerformanceRating,
    },
};

const EVENT_RACE_ARMED: &str = "race.armed";
const EVENT_RACE_LIGHT: &str = "race.light";
const EVENT_RACE_LIVE: &str = "race.live";
const EVENT_RACE_COMPLETED: &str = "race.completed";
const EVENT_RACE_FAULTED: &str = "race.faulted";
const EVENT_SCORE_RECORDED: &str = "score.recorded";
const EVENT_SCORE_PERSIST_FAILED: &str = "score.persist_failed";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Relay race notices onto the public SSE stream until the registry goes away.
pub async fn forward_race_notices(state: SharedState) {
    let mut notices = state.races().subscribe();
    loop {
        match notices.recv().await {
            Ok(notice) => broadcast_race_notice(&state, notice),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "race notice forwarder lagging; events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Relay degraded-mode changes as `system.status` events.
pub async fn forward_system_status(state: SharedState) {
    let mut watcher = state.degraded_watcher();
    while watcher.changed().await.is_ok() {
        let degraded = *watcher.borrow_and_update();
        info!(degraded, "storage status changed");
        send_public_event(&state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
    }
}

/// Translate one race notice into its SSE event.
pub fn broadcast_race_notice(state: &SharedState, notice: RaceNotice) {
    let RaceNotice {
        session_id,
        player_id,
        epoch,
        kind,
    } = notice;

    match kind {
        RaceNoticeKind::Armed {
            light_count,
            light_interval_ms,
        } => send_public_event(
            state,
            EVENT_RACE_ARMED,
            &RaceArmedEvent {
                session_id,
                player_id,
                epoch,
                light_count,
                light_interval_ms,
            },
        ),
        RaceNoticeKind::LightOn { stage } => send_public_event(
            state,
            EVENT_RACE_LIGHT,
            &RaceLightEvent {
                session_id,
                epoch,
                stage,
            },
        ),
        RaceNoticeKind::Live => send_public_event(
            state,
            EVENT_RACE_LIVE,
            &RaceLiveEvent { session_id, epoch },
        ),
        RaceNoticeKind::Completed(result) => send_public_event(
            state,
            EVENT_RACE_COMPLETED,
            &RaceCompletedEvent {
                session_id,
                player_id,
                epoch,
                result: result.into(),
            },
        ),
        RaceNoticeKind::Faulted => send_public_event(
            state,
            EVENT_RACE_FAULTED,
            &RaceFaultedEvent {
                session_id,
                player_id,
                epoch,
            },
        ),
    }
}

/// Announce a result that reached the score store.
pub fn broadcast_score_recorded(
    state: &SharedState,
    record: &ScoreRecordEntity,
    stats: PlayerStatsEntity,
) {
    let payload = ScoreRecordedEvent {
        record_id: record.id,
        player_id: record.player_id.clone(),
        reaction_time_ms: record.reaction_time_ms,
        score: record.score,
        rating: PerformanceRating::from_reaction_ms(record.reaction_time_ms),
        stats: stats.into(),
    };
    send_public_event(state, EVENT_SCORE_RECORDED, &payload);
}

/// Announce a result that could not be persisted.
pub fn broadcast_score_persist_failed(
    state: &SharedState,
    record: &ScoreRecordEntity,
    error: &ServiceError,
) {
    let payload = ScorePersistFailedEvent {
        record_id: record.id,
        player_id: record.player_id.clone(),
        reaction_time_ms: record.reaction_time_ms,
        score: record.score,
        reason: error.to_string(),
    };
    send_public_event(state, EVENT_SCORE_PERSIST_FAILED, &payload);
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::sleep;

    use super::*;
    use crate::{
        config::AppConfig,
        state::{AppState, race_timer::FixedDelay},
    };

    #[tokio::test(start_paused = true)]
    async fn race_notices_become_public_events() {
        let state = AppState::with_delays(
            AppConfig::default(),
            Arc::new(FixedDelay(Duration::from_millis(500))),
        );
        let mut events = state.public_sse().subscribe();
        tokio::spawn(forward_race_notices(state.clone()));
        tokio::task::yield_now().await;

        let session = state.races().create("driver@gmail.com".into());
        session.arm().await;
        sleep(Duration::from_millis(5_600)).await;

        let names: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| event.event)
            .collect();
        assert_eq!(names.first().map(String::as_str), Some(EVENT_RACE_ARMED));
        assert_eq!(
            names.iter().filter(|name| *name == EVENT_RACE_LIGHT).count(),
            5
        );
        assert_eq!(names.last().map(String::as_str), Some(EVENT_RACE_LIVE));
    }

    #[tokio::test]
    async fn degraded_changes_are_announced() {
        let state = AppState::new(AppConfig::default());
        let mut events = state.public_sse().subscribe();
        tokio::spawn(forward_system_status(state.clone()));
        tokio::task::yield_now().await;

        state.update_degraded(false);
        let event = events.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_SYSTEM_STATUS));
        assert_eq!(event.data, r#"{"degraded":false}"#);
    }
}
