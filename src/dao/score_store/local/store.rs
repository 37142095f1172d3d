use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use super::error::{LocalResult, LocalStoreError};
use crate::{
    dao::{
        models::{LeaderboardEntryEntity, PlayerEntity, PlayerStatsEntity, ScoreRecordEntity},
        score_store::ScoreStore,
        storage::{StorageError, StorageResult},
    },
    state::stats,
};

/// Single JSON document holding every player and their score history.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalDocument {
    players: BTreeMap<String, LocalPlayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalPlayer {
    #[serde(flatten)]
    player: PlayerEntity,
    #[serde(default)]
    scores: Vec<ScoreRecordEntity>,
}

/// Store keeping everything in memory, optionally mirrored to one JSON file on disk.
#[derive(Clone)]
pub struct LocalScoreStore {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    path: Option<PathBuf>,
    document: Mutex<LocalDocument>,
}

impl LocalScoreStore {
    /// Volatile store; nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(LocalInner {
                path: None,
                document: Mutex::new(LocalDocument::default()),
            }),
        }
    }

    /// Load the document at `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> LocalResult<Self> {
        let path = path.into();
        let document = read_document(&path).await?.unwrap_or_default();
        info!(
            path = %path.display(),
            players = document.players.len(),
            "local score store opened"
        );

        Ok(Self {
            inner: Arc::new(LocalInner {
                path: Some(path),
                document: Mutex::new(document),
            }),
        })
    }

    async fn persist(&self, document: &LocalDocument) -> LocalResult<()> {
        let Some(path) = self.inner.path.as_deref() else {
            return Ok(());
        };
        write_document(path, document).await
    }

    async fn register_player(&self, player: PlayerEntity) -> LocalResult<PlayerEntity> {
        let mut document = self.inner.document.lock().await;
        if let Some(existing) = document.players.get(&player.id) {
            return Ok(existing.player.clone());
        }

        document.players.insert(
            player.id.clone(),
            LocalPlayer {
                player: player.clone(),
                scores: Vec::new(),
            },
        );

        if let Err(err) = self.persist(&document).await {
            document.players.remove(&player.id);
            return Err(err);
        }

        Ok(player)
    }

    async fn record_score(&self, record: ScoreRecordEntity) -> StorageResult<PlayerStatsEntity> {
        let mut document = self.inner.document.lock().await;
        let Some(entry) = document.players.get_mut(&record.player_id) else {
            return Err(StorageError::UnknownPlayer {
                player_id: record.player_id,
            });
        };

        if entry.scores.iter().any(|existing| existing.id == record.id) {
            debug!(record_id = %record.id, "score record already stored");
            return Ok(stats::aggregate(&entry.player.id, &entry.scores));
        }

        let player_id = record.player_id.clone();
        let previous_last_played = entry.player.last_played;
        entry.player.last_played = Some(
            previous_last_played
                .map_or(record.finalized_at, |last| last.max(record.finalized_at)),
        );
        entry.scores.push(record);

        if let Err(err) = self.persist(&document).await {
            if let Some(entry) = document.players.get_mut(&player_id) {
                entry.scores.pop();
                entry.player.last_played = previous_last_played;
            }
            return Err(err.into());
        }

        let entry = &document.players[&player_id];
        Ok(stats::aggregate(&entry.player.id, &entry.scores))
    }

    async fn health_check(&self) -> LocalResult<()> {
        let Some(path) = self.inner.path.as_deref() else {
            return Ok(());
        };
        let directory = parent_directory(path);
        fs::metadata(&directory)
            .await
            .map(|_| ())
            .map_err(|source| LocalStoreError::DirectoryUnavailable {
                path: directory,
                source,
            })
    }

    async fn reload(&self) -> LocalResult<()> {
        let Some(path) = self.inner.path.as_deref() else {
            return Ok(());
        };
        let mut document = self.inner.document.lock().await;
        match read_document(path).await? {
            Some(fresh) => {
                *document = fresh;
                Ok(())
            }
            None => {
                // Memory holds the only copy left.
                warn!(
                    path = %path.display(),
                    players = document.players.len(),
                    "local score document missing; restoring it from memory"
                );
                write_document(path, &document).await
            }
        }
    }
}

impl ScoreStore for LocalScoreStore {
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
        Box::pin(async move {
            let document = store.inner.document.lock().await;
            Ok(document
                .players
                .get(&player_id)
                .map(|entry| entry.player.clone()))
        })
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
        Box::pin(async move {
            let document = store.inner.document.lock().await;
            Ok(document
                .players
                .get(&player_id)
                .map(|entry| stats::aggregate(&entry.player.id, &entry.scores)))
        })
    }

    fn top_scores(
        &self,
        player_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreRecordEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.inner.document.lock().await;
            let records = document
                .players
                .get(&player_id)
                .map(|entry| entry.scores.clone())
                .unwrap_or_default();
            Ok(stats::rank_scores(records, limit))
        })
    }

    fn leaderboard(
        &self,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LeaderboardEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.inner.document.lock().await;
            let entries = document
                .players
                .values()
                .map(|entry| {
                    let player_stats = stats::aggregate(&entry.player.id, &entry.scores);
                    stats::leaderboard_entry(&entry.player, &player_stats)
                })
                .collect();
            Ok(stats::rank_leaderboard(entries, limit))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.health_check().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.reload().await.map_err(Into::into) })
    }
}

/// Read the document at `path`; `None` when there is no file or it is blank.
async fn read_document(path: &Path) -> LocalResult<Option<LocalDocument>> {
    match fs::read_to_string(path).await {
        Ok(contents) if contents.trim().is_empty() => Ok(None),
        Ok(contents) => serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| LocalStoreError::Decode {
                path: path.to_path_buf(),
                source,
            }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LocalStoreError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write through a sibling temp file and rename so readers never see a torn document.
async fn write_document(path: &Path, document: &LocalDocument) -> LocalResult<()> {
    let payload = serde_json::to_vec_pretty(document)
        .map_err(|source| LocalStoreError::Encode { source })?;

    let directory = parent_directory(path);
    fs::create_dir_all(&directory)
        .await
        .map_err(|source| LocalStoreError::Write {
            path: directory.clone(),
            source,
        })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)
        .await
        .map_err(|source| LocalStoreError::Write {
            path: tmp.clone(),
            source,
        })?;
    fs::rename(&tmp, path)
        .await
        .map_err(|source| LocalStoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn parent_directory(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use uuid::Uuid;

    use super::*;

    const DRIVER: &str = "driver@gmail.com";

    fn record(reaction_time_ms: u64, score: u32) -> ScoreRecordEntity {
        ScoreRecordEntity {
            id: Uuid::new_v4(),
            player_id: DRIVER.into(),
            reaction_time_ms,
            score,
            lights: 5,
            finalized_at: SystemTime::UNIX_EPOCH + Duration::from_secs(reaction_time_ms),
        }
    }

    #[tokio::test]
    async fn register_is_get_or_create() {
        let store = LocalScoreStore::in_memory();
        let first = ScoreStore::register_player(&store, PlayerEntity::new(DRIVER, "Driver"))
            .await
            .unwrap();
        let second = ScoreStore::register_player(&store, PlayerEntity::new(DRIVER, "Renamed"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.name, "Driver");
    }

    #[tokio::test]
    async fn duplicate_record_is_counted_once() {
        let store = LocalScoreStore::in_memory();
        ScoreStore::register_player(&store, PlayerEntity::new(DRIVER, "Driver"))
            .await
            .unwrap();

        let record = record(180, 900);
        let first = ScoreStore::record_score(&store, record.clone())
            .await
            .unwrap();
        let second = ScoreStore::record_score(&store, record).await.unwrap();

        assert_eq!(first.total_games, 1);
        assert_eq!(second, first);
        let player = store.find_player(DRIVER.into()).await.unwrap().unwrap();
        assert!(player.last_played.is_some());
    }

    #[tokio::test]
    async fn unknown_player_is_rejected() {
        let store = LocalScoreStore::in_memory();
        let err = ScoreStore::record_score(&store, record(200, 800))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownPlayer { .. }));
    }

    #[tokio::test]
    async fn top_scores_and_leaderboard_are_ranked() {
        let store = LocalScoreStore::in_memory();
        ScoreStore::register_player(&store, PlayerEntity::new(DRIVER, "Driver"))
            .await
            .unwrap();
        ScoreStore::register_player(&store, PlayerEntity::new("rookie@gmail.com", "Rookie"))
            .await
            .unwrap();

        for (ms, score) in [(320, 600), (140, 1000), (210, 800)] {
            ScoreStore::record_score(&store, record(ms, score))
                .await
                .unwrap();
        }
        let mut rookie = record(450, 400);
        rookie.player_id = "rookie@gmail.com".into();
        ScoreStore::record_score(&store, rookie).await.unwrap();

        let top = store.top_scores(DRIVER.into(), 2).await.unwrap();
        assert_eq!(
            top.iter().map(|r| r.score).collect::<Vec<_>>(),
            vec![1000, 800]
        );

        let board = store.leaderboard(10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].player_id, DRIVER);
        assert_eq!(board[0].best_reaction_time_ms, Some(140));
        assert_eq!(board[1].name, "Rookie");
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let path = std::env::temp_dir()
            .join(format!("start-lights-{}", Uuid::new_v4()))
            .join("scores.json");

        let store = LocalScoreStore::open(&path).await.unwrap();
        ScoreStore::register_player(&store, PlayerEntity::new(DRIVER, "Driver"))
            .await
            .unwrap();
        ScoreStore::record_score(&store, record(230, 800))
            .await
            .unwrap();
        store.health_check().await.unwrap();

        let reopened = LocalScoreStore::open(&path).await.unwrap();
        let stats = reopened
            .player_stats(DRIVER.into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_games, 1);
        assert_eq!(stats.best_reaction_time_ms, Some(230));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn reconnect_after_losing_the_directory_keeps_history() {
        let directory = std::env::temp_dir().join(format!("start-lights-{}", Uuid::new_v4()));
        let path = directory.join("scores.json");

        let store = LocalScoreStore::open(&path).await.unwrap();
        ScoreStore::register_player(&store, PlayerEntity::new(DRIVER, "Driver"))
            .await
            .unwrap();
        ScoreStore::record_score(&store, record(190, 900))
            .await
            .unwrap();

        std::fs::remove_dir_all(&directory).unwrap();
        assert!(ScoreStore::health_check(&store).await.is_err());
        ScoreStore::try_reconnect(&store).await.unwrap();

        let stats = store.player_stats(DRIVER.into()).await.unwrap().unwrap();
        assert_eq!(stats.total_games, 1);
        assert!(path.exists());

        let reopened = LocalScoreStore::open(&path).await.unwrap();
        let stats = reopened
            .player_stats(DRIVER.into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.best_reaction_time_ms, Some(190));

        let _ = std::fs::remove_dir_all(&directory);
    }
}
