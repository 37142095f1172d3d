use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::{
    models::{PlayerEntity, ScoreRecordEntity},
    score_store::couchdb::error::CouchDaoError,
};

pub const PLAYER_PREFIX: &str = "player::";
pub const SCORE_PREFIX: &str = "score::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchPlayerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub player: PlayerBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerBody {
    pub email: String,
    pub name: String,
    pub registered_at: SystemTime,
    #[serde(default)]
    pub last_played: Option<SystemTime>,
}

impl From<(PlayerEntity, Option<String>)> for CouchPlayerDocument {
    fn from((player, rev): (PlayerEntity, Option<String>)) -> Self {
        Self {
            id: player_doc_id(&player.id),
            rev,
            player: PlayerBody {
                email: player.id,
                name: player.name,
                registered_at: player.registered_at,
                last_played: player.last_played,
            },
        }
    }
}

impl From<CouchPlayerDocument> for PlayerEntity {
    fn from(doc: CouchPlayerDocument) -> Self {
        Self {
            id: doc.player.email,
            name: doc.player.name,
            registered_at: doc.player.registered_at,
            last_played: doc.player.last_played,
        }
    }
}

/// Score documents are immutable: they are created once and never carry a revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchScoreDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub score: ScoreBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBody {
    pub player_id: String,
    pub reaction_time_ms: u64,
    pub score: u32,
    pub lights: u8,
    pub finalized_at: SystemTime,
}

impl From<ScoreRecordEntity> for CouchScoreDocument {
    fn from(record: ScoreRecordEntity) -> Self {
        Self {
            id: score_doc_id(&record.player_id, record.id),
            score: ScoreBody {
                player_id: record.player_id,
                reaction_time_ms: record.reaction_time_ms,
                score: record.score,
                lights: record.lights,
                finalized_at: record.finalized_at,
            },
        }
    }
}

impl TryFrom<CouchScoreDocument> for ScoreRecordEntity {
    type Error = CouchDaoError;

    fn try_from(doc: CouchScoreDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: extract_record_id(&doc.id)?,
            player_id: doc.score.player_id,
            reaction_time_ms: doc.score.reaction_time_ms,
            score: doc.score.score,
            lights: doc.score.lights,
            finalized_at: doc.score.finalized_at,
        })
    }
}

pub fn player_doc_id(player_id: &str) -> String {
    format!("{}{}", PLAYER_PREFIX, player_id)
}

/// Score ids are grouped under their player so a prefix scan returns one history.
pub fn score_doc_id(player_id: &str, record_id: Uuid) -> String {
    format!("{}{}", score_prefix_for(player_id), record_id)
}

pub fn score_prefix_for(player_id: &str) -> String {
    format!("{}{}::", SCORE_PREFIX, player_id)
}

pub fn extract_record_id(doc_id: &str) -> Result<Uuid, CouchDaoError> {
    let (_, id) = doc_id
        .rsplit_once("::")
        .ok_or_else(|| CouchDaoError::InvalidDocId {
            doc_id: doc_id.to_string(),
            kind: "missing separator",
        })?;

    Uuid::parse_str(id).map_err(|_| CouchDaoError::InvalidDocId {
        doc_id: doc_id.to_string(),
        kind: "invalid UUID",
    })
}
