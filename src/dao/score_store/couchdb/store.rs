use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::debug;

use crate::{
    dao::{
        models::{LeaderboardEntryEntity, PlayerEntity, PlayerStatsEntity, ScoreRecordEntity},
        score_store::ScoreStore,
        storage::{StorageError, StorageResult},
    },
    state::stats,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchPlayerDocument, CouchScoreDocument, END_SUFFIX, PLAYER_PREFIX,
        SCORE_PREFIX, player_doc_id, score_doc_id, score_prefix_for,
    },
};

#[derive(Clone)]
pub struct CouchScoreStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchScoreStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config.credentials.map(|credentials| {
            (
                Arc::<str>::from(credentials.username),
                Arc::<str>::from(credentials.password),
            )
        });

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            self.database,
            encode_path_segment(path)
        );
        self.authorize(self.client.request(method, url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document; returns `false` when CouchDB reports a revision conflict.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<bool>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut documents = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let parsed = from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: row.id.clone(),
                    source,
                })?;
                documents.push(parsed);
            }
        }

        Ok(documents)
    }

    async fn player_records(&self, player_id: &str) -> CouchResult<Vec<ScoreRecordEntity>> {
        self.list_documents::<CouchScoreDocument>(&score_prefix_for(player_id))
            .await?
            .into_iter()
            .map(ScoreRecordEntity::try_from)
            .collect()
    }

    async fn register(&self, player: PlayerEntity) -> CouchResult<PlayerEntity> {
        let doc_id = player_doc_id(&player.id);
        if let Some(existing) = self.get_document::<CouchPlayerDocument>(&doc_id).await? {
            return Ok(existing.into());
        }

        let doc = CouchPlayerDocument::from((player.clone(), None));
        if self.put_document(&doc_id, &doc).await? {
            return Ok(player);
        }

        // Lost a creation race against another writer: the stored document wins.
        self.get_document::<CouchPlayerDocument>(&doc_id)
            .await?
            .map(Into::into)
            .ok_or(CouchDaoError::RequestStatus {
                path: doc_id,
                status: StatusCode::CONFLICT,
            })
    }

    async fn record(&self, record: ScoreRecordEntity) -> StorageResult<PlayerStatsEntity> {
        let player_id = record.player_id.clone();
        let player_doc = player_doc_id(&player_id);
        let Some(mut player) = self
            .get_document::<CouchPlayerDocument>(&player_doc)
            .await?
        else {
            return Err(StorageError::UnknownPlayer { player_id });
        };

        let finalized_at = record.finalized_at;
        let doc_id = score_doc_id(&player_id, record.id);
        let created = self
            .put_document(&doc_id, &CouchScoreDocument::from(record))
            .await?;

        if created {
            let last_played = player
                .player
                .last_played
                .map_or(finalized_at, |last| last.max(finalized_at));
            player.player.last_played = Some(last_played);
            // last_played is advisory; a concurrent update already moved it forward.
            if !self.put_document(&player_doc, &player).await? {
                debug!(player_id = %player_id, "player document updated concurrently");
            }
        } else {
            debug!(doc_id = %doc_id, "score record already stored");
        }

        let records = self.player_records(&player_id).await?;
        Ok(stats::aggregate(&player_id, &records))
    }

    async fn ranking(&self, limit: usize) -> CouchResult<Vec<LeaderboardEntryEntity>> {
        let players = self
            .list_documents::<CouchPlayerDocument>(PLAYER_PREFIX)
            .await?;
        let mut histories: HashMap<String, Vec<ScoreRecordEntity>> = HashMap::new();
        for doc in self
            .list_documents::<CouchScoreDocument>(SCORE_PREFIX)
            .await?
        {
            let record = ScoreRecordEntity::try_from(doc)?;
            histories
                .entry(record.player_id.clone())
                .or_default()
                .push(record);
        }

        let entries = players
            .into_iter()
            .map(|doc| {
                let player = PlayerEntity::from(doc);
                let records = histories.remove(&player.id).unwrap_or_default();
                let player_stats = stats::aggregate(&player.id, &records);
                stats::leaderboard_entry(&player, &player_stats)
            })
            .collect();
        Ok(stats::rank_leaderboard(entries, limit))
    }
}

impl ScoreStore for CouchScoreStore {
    fn register_player(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.register(player).await.map_err(Into::into) })
    }

    fn find_player(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchPlayerDocument>(&player_doc_id(&player_id))
                .await?;
            Ok(doc.map(Into::into))
        })
    }

    fn record_score(
        &self,
        record: ScoreRecordEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerStatsEntity>> {
        let store = self.clone();
        Box::pin(async move { store.record(record).await })
    }

    fn player_stats(
        &self,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerStatsEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let exists = store
                .get_document::<CouchPlayerDocument>(&player_doc_id(&player_id))
                .await?
                .is_some();
            if !exists {
                return Ok(None);
            }
            let records = store.player_records(&player_id).await?;
            Ok(Some(stats::aggregate(&player_id, &records)))
        })
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
        Box::pin(async move { store.ranking(limit).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}

/// Escape the characters that would otherwise end a URL path segment early.
fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            '%' => encoded.push_str("%25"),
            '/' => encoded.push_str("%2F"),
            '?' => encoded.push_str("%3F"),
            '#' => encoded.push_str("%23"),
            ' ' => encoded.push_str("%20"),
            other => encoded.push(other),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::encode_path_segment;

    #[test]
    fn path_segments_keep_email_ids_intact() {
        assert_eq!(
            encode_path_segment("player::max.v+f1@gmail.com"),
            "player::max.v+f1@gmail.com"
        );
        assert_eq!(encode_path_segment("score::a/b?c#d"), "score::a%2Fb%3Fc%23d");
    }
}
