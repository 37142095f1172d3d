use tracing::info;

use crate::{
    dao::models::PlayerEntity,
    dto::{
        player::{
            LeaderboardEntryResponse, PlayerStatsResponse, PlayerSummary, RegisterPlayerRequest,
            ScoreRecordResponse,
        },
        validation::validate_player_email,
    },
    error::ServiceError,
    state::SharedState,
};

/// Canonical player identity: trimmed, lower-cased e-mail.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalized id of a player referenced by path, rejecting anything that is not an e-mail.
pub fn player_key(raw: &str) -> Result<String, ServiceError> {
    validate_player_email(raw).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.to_string())
                .unwrap_or_else(|| format!("`{raw}` is not a player e-mail")),
        )
    })?;
    Ok(normalize_email(raw))
}

/// Display name derived from the e-mail local part: `max.verstappen@…` → `Max Verstappen`.
pub fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let name = local
        .split(['.', '_'])
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() {
        local.to_string()
    } else {
        name
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Build the entity registered for `email` when no explicit name is supplied.
pub fn player_for(email: &str, name: Option<&str>) -> PlayerEntity {
    let id = normalize_email(email);
    let name = name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| display_name_from_email(&id));
    PlayerEntity::new(id, name)
}

/// Register a player, returning the stored one when the e-mail is already known.
pub async fn register(
    state: &SharedState,
    request: RegisterPlayerRequest,
) -> Result<PlayerSummary, ServiceError> {
    let store = state.require_score_store().await?;
    let player = store
        .register_player(player_for(&request.email, request.name.as_deref()))
        .await?;
    info!(player_id = %player.id, "player registered");
    Ok(player.into())
}

/// Aggregate statistics of a player.
pub async fn stats(state: &SharedState, player_id: &str) -> Result<PlayerStatsResponse, ServiceError> {
    let id = player_key(player_id)?;
    let store = state.require_score_store().await?;
    store
        .player_stats(id.clone())
        .await?
        .map(Into::into)
        .ok_or_else(|| ServiceError::NotFound(format!("player `{id}`")))
}

/// Best results of a player.
pub async fn top_scores(
    state: &SharedState,
    player_id: &str,
    limit: usize,
) -> Result<Vec<ScoreRecordResponse>, ServiceError> {
    let id = player_key(player_id)?;
    let store = state.require_score_store().await?;
    if store.find_player(id.clone()).await?.is_none() {
        return Err(ServiceError::NotFound(format!("player `{id}`")));
    }

    let records = store.top_scores(id, limit).await?;
    Ok(records.into_iter().map(Into::into).collect())
}

/// Best players overall.
pub async fn leaderboard(
    state: &SharedState,
    limit: usize,
) -> Result<Vec<LeaderboardEntryResponse>, ServiceError> {
    let store = state.require_score_store().await?;
    let entries = store.leaderboard(limit).await?;
    Ok(entries
        .into_iter()
        .enumerate()
        .map(Into::into)
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::ScoreRecordEntity,
            score_store::{ScoreStore, local::LocalScoreStore},
        },
        state::AppState,
    };

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Max.Verstappen@Gmail.COM "), "max.verstappen@gmail.com");
    }

    #[test]
    fn names_come_from_the_local_part() {
        assert_eq!(display_name_from_email("max.verstappen@gmail.com"), "Max Verstappen");
        assert_eq!(display_name_from_email("charles_leclerc@ferrari.it"), "Charles Leclerc");
        assert_eq!(display_name_from_email("lando@mclaren.com"), "Lando");
        assert_eq!(display_name_from_email("._@odd.com"), "._");
    }

    #[test]
    fn path_ids_must_be_emails() {
        assert_eq!(player_key(" Lando@McLaren.com").unwrap(), "lando@mclaren.com");
        assert!(matches!(player_key("lando"), Err(ServiceError::InvalidInput(_))));
    }

    #[test]
    fn explicit_name_wins() {
        let player = player_for("MAX@gmail.com", Some("  Super Max "));
        assert_eq!(player.id, "max@gmail.com");
        assert_eq!(player.name, "Super Max");
    }

    #[tokio::test]
    async fn degraded_mode_is_reported() {
        let state = AppState::new(AppConfig::default());
        let err = leaderboard(&state, 10).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn register_then_query() {
        let state = AppState::new(AppConfig::default());
        let store = Arc::new(LocalScoreStore::in_memory());
        state.set_score_store(store.clone()).await;

        let summary = register(
            &state,
            RegisterPlayerRequest {
                email: "Max.Verstappen@gmail.com".into(),
                name: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(summary.id, "max.verstappen@gmail.com");
        assert_eq!(summary.name, "Max Verstappen");

        let stats_before = stats(&state, "MAX.VERSTAPPEN@gmail.com").await.unwrap();
        assert_eq!(stats_before.total_games, 0);
        assert!(matches!(
            stats(&state, "nobody@gmail.com").await,
            Err(ServiceError::NotFound(_))
        ));

        store
            .record_score(ScoreRecordEntity {
                id: uuid::Uuid::new_v4(),
                player_id: summary.id.clone(),
                reaction_time_ms: 180,
                score: 900,
                lights: 5,
                finalized_at: std::time::SystemTime::now(),
            })
            .await
            .unwrap();

        let board = leaderboard(&state, 10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].best_score, 900);

        let scores = top_scores(&state, &summary.id, 10).await.unwrap();
        assert_eq!(scores[0].reaction_time_ms, 180);
    }
}
