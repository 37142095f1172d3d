//! Aggregate statistics over a player's score history.

use std::cmp::Ordering;

use crate::dao::models::{
    LeaderboardEntryEntity, PlayerEntity, PlayerStatsEntity, ScoreRecordEntity,
};

/// Compute the statistics of `player_id` from its records (any order).
pub fn aggregate(player_id: &str, records: &[ScoreRecordEntity]) -> PlayerStatsEntity {
    let mut chronological = records.iter().collect::<Vec<_>>();
    chronological.sort_by_key(|record| record.finalized_at);

    let reaction_times = chronological
        .iter()
        .map(|record| record.reaction_time_ms as f64)
        .filter(|ms| *ms > 0.0)
        .collect::<Vec<_>>();

    let total_games = records.len() as u64;
    let average_score = mean(&records.iter().map(|r| r.score as f64).collect::<Vec<_>>());

    PlayerStatsEntity {
        player_id: player_id.to_string(),
        total_games,
        best_score: records.iter().map(|r| r.score).max().unwrap_or(0),
        best_reaction_time_ms: records.iter().map(|r| r.reaction_time_ms).min(),
        average_reaction_time_ms: mean(&reaction_times),
        average_score,
        improvement_ms: improvement(&reaction_times),
        consistency_ms: standard_deviation(&reaction_times),
        last_played: chronological.last().map(|record| record.finalized_at),
    }
}

/// Build a leaderboard row from a player and its statistics.
pub fn leaderboard_entry(
    player: &PlayerEntity,
    stats: &PlayerStatsEntity,
) -> LeaderboardEntryEntity {
    LeaderboardEntryEntity {
        player_id: player.id.clone(),
        name: player.name.clone(),
        best_score: stats.best_score,
        best_reaction_time_ms: stats.best_reaction_time_ms,
        total_games: stats.total_games,
    }
}

/// Sort by best score (desc) then fastest reaction (asc) and keep `limit` rows.
///
/// Players that never finished a race are left out.
pub fn rank_leaderboard(
    mut entries: Vec<LeaderboardEntryEntity>,
    limit: usize,
) -> Vec<LeaderboardEntryEntity> {
    entries.retain(|entry| entry.total_games > 0);
    entries.sort_by(|a, b| {
        b.best_score
            .cmp(&a.best_score)
            .then_with(|| compare_reaction(a.best_reaction_time_ms, b.best_reaction_time_ms))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
    entries.truncate(limit);
    entries
}

/// Sort records by score (desc) then reaction (asc) and keep `limit` rows.
pub fn rank_scores(mut records: Vec<ScoreRecordEntity>, limit: usize) -> Vec<ScoreRecordEntity> {
    records.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.reaction_time_ms.cmp(&b.reaction_time_ms))
            .then_with(|| a.finalized_at.cmp(&b.finalized_at))
    });
    records.truncate(limit);
    records
}

fn compare_reaction(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn improvement(chronological: &[f64]) -> f64 {
    if chronological.len() < 2 {
        return 0.0;
    }
    let (older, newer) = chronological.split_at(chronological.len() / 2);
    mean(older) - mean(newer)
}

fn standard_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
