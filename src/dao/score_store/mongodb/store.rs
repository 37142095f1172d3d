use std::{collections::HashMap, sync::Arc};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::{DateTime, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection::connect_score_database,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoPlayerDocument, MongoScoreDocument, doc_id, player_insert_fields, record_doc_id,
        score_insert_fields,
    },
};
use crate::{
    dao::{
        models::{LeaderboardEntryEntity, PlayerEntity, PlayerStatsEntity, ScoreRecordEntity},
        score_store::ScoreStore,
        storage::{StorageError, StorageResult},
    },
    state::stats,
};

const PLAYER_COLLECTION_NAME: &str = "players";
const SCORE_COLLECTION_NAME: &str = "scores";

#[derive(Clone)]
pub struct MongoScoreStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) =
            connect_score_database(&self.config.options, &self.config.database_name).await?;
        self.state.write().await.database = database;
        Ok(())
    }
}

impl MongoScoreStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            connect_score_database(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.scores().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"player_id": 1, "score": -1, "reaction_time_ms": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("score_player_rank_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SCORE_COLLECTION_NAME,
                index: "player_id,score,reaction_time_ms",
                source,
            })?;

        Ok(())
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoPlayerDocument>(PLAYER_COLLECTION_NAME)
    }

    async fn scores(&self) -> Collection<MongoScoreDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoScoreDocument>(SCORE_COLLECTION_NAME)
    }

    async fn find_player(&self, id: String) -> MongoResult<Option<PlayerEntity>> {
        let collection = self.players().await;
        let document = collection
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::LoadPlayer { id, source })?;
        Ok(document.map(Into::into))
    }

    /// Upsert with `$setOnInsert` so concurrent registrations converge on one document.
    async fn register_player(&self, player: PlayerEntity) -> MongoResult<PlayerEntity> {
        let id = player.id.clone();
        let collection = self.players().await;
        collection
            .update_one(
                doc_id(&id),
                doc! { "$setOnInsert": player_insert_fields(&player) },
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePlayer {
                id: id.clone(),
                source,
            })?;

        Ok(self.find_player(id).await?.unwrap_or(player))
    }

    async fn player_records(&self, player_id: &str) -> MongoResult<Vec<ScoreRecordEntity>> {
        let collection = self.scores().await;
        let documents: Vec<MongoScoreDocument> = collection
            .find(doc! { "player_id": player_id })
            .await
            .map_err(|source| MongoDaoError::LoadScores {
                player_id: player_id.to_owned(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadScores {
                player_id: player_id.to_owned(),
                source,
            })?;

        documents
            .into_iter()
            .map(ScoreRecordEntity::try_from)
            .collect()
    }

    async fn record_score(&self, record: ScoreRecordEntity) -> StorageResult<PlayerStatsEntity> {
        let player_id = record.player_id.clone();
        if self.find_player(player_id.clone()).await?.is_none() {
            return Err(StorageError::UnknownPlayer { player_id });
        }

        let record_id = record.id.to_string();
        let result = self
            .scores()
            .await
            .update_one(
                record_doc_id(record.id),
                doc! { "$setOnInsert": score_insert_fields(&record) },
            )
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveScore {
                id: record_id.clone(),
                source,
            })?;

        if result.upserted_id.is_some() {
            self.players()
                .await
                .update_one(
                    doc_id(&player_id),
                    doc! { "$max": { "last_played": DateTime::from_system_time(record.finalized_at) } },
                )
                .await
                .map_err(|source| MongoDaoError::SavePlayer {
                    id: player_id.clone(),
                    source,
                })?;
        } else {
            debug!(record_id = %record_id, "score record already stored");
        }

        let records = self.player_records(&player_id).await?;
        Ok(stats::aggregate(&player_id, &records))
    }

    async fn player_stats(&self, player_id: String) -> MongoResult<Option<PlayerStatsEntity>> {
        if self.find_player(player_id.clone()).await?.is_none() {
            return Ok(None);
        }
        let records = self.player_records(&player_id).await?;
        Ok(Some(stats::aggregate(&player_id, &records)))
    }

    async fn leaderboard(&self, limit: usize) -> MongoResult<Vec<LeaderboardEntryEntity>> {
        let players: Vec<MongoPlayerDocument> = self
            .players()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListPlayers { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListPlayers { source })?;

        let scores: Vec<MongoScoreDocument> = self
            .scores()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListScores { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListScores { source })?;

        let mut histories: HashMap<String, Vec<ScoreRecordEntity>> = HashMap::new();
        for document in scores {
            let record = ScoreRecordEntity::try_from(document)?;
            histories
                .entry(record.player_id.clone())
                .or_default()
                .push(record);
        }

        let entries = players
            .into_iter()
            .map(|document| {
                let player = PlayerEntity::from(document);
                let records = histories.remove(&player.id).unwrap_or_default();
                let player_stats = stats::aggregate(&player.id, &records);
                stats::leaderboard_entry(&player, &player_stats)
            })
            .collect();
        Ok(stats::rank_leaderboard(entries, limit))
    }
}

impl ScoreStore for MongoScoreStore {
    fn register_player(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.register_player(player).await.map_err(Into::into) })
    }

    fn find_player(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(player_id).await.map_err(Into::into) })
    }

    fn record_score(
        &self,
        record: ScoreRecordEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerStatsEntity>> {
        let store = self.clone();
        Box::pin(async move { store.record_score(record).await })
    }

    fn player_stats(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.player_stats(player_id).await.map_err(Into::into) })
    }

    fn top_scores(
        &self,
        player_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let records = store.player_records(&player_id).await?;
            Ok(stats::rank_scores(records, limit))
        })
    }

    fn leaderboard(
        &self,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LeaderboardEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.leaderboard(limit).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
