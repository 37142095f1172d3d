use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage status and open sessions while logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_score_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let open_races = state.races().len();
    if state.is_degraded() {
        HealthResponse::degraded(open_races)
    } else {
        HealthResponse::ok(open_races)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::score_store::local::LocalScoreStore, state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_then_ok() {
        let state = AppState::new(AppConfig::default());
        state.races().create("driver@gmail.com".into());

        let before = health_status(&state).await;
        assert_eq!(before.status, "degraded");
        assert_eq!(before.open_races, 1);

        state
            .set_score_store(Arc::new(LocalScoreStore::in_memory()))
            .await;
        let after = health_status(&state).await;
        assert_eq!(after.status, "ok");
    }
}
