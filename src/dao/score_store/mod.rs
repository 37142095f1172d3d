#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod local;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    LeaderboardEntryEntity, PlayerEntity, PlayerStatsEntity, ScoreRecordEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the persistence layer for players and finalized race results.
///
/// Implementations must treat records carrying an already stored id as no-ops so a
/// replayed submission never counts twice.
pub trait ScoreStore: Send + Sync {
    /// Return the stored player with the same id, creating `player` when absent.
    fn register_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    /// Fetch a player by id.
    fn find_player(&self, player_id: String) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Persist a record and return the owner's refreshed statistics.
    fn record_score(
        &self,
        record: ScoreRecordEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerStatsEntity>>;
    /// Aggregate statistics of a player, `None` when the player is unknown.
    fn player_stats(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsEntity>>>;
    /// Best records of a player (score desc, reaction asc).
    fn top_scores(
        &self,
        player_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreRecordEntity>>>;
    /// Best players across the store.
    fn leaderboard(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<LeaderboardEntryEntity>>>;
    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
