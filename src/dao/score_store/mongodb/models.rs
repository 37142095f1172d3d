use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{PlayerEntity, ScoreRecordEntity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    registered_at: DateTime,
    #[serde(default)]
    last_played: Option<DateTime>,
}

impl From<MongoPlayerDocument> for PlayerEntity {
    fn from(value: MongoPlayerDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
            registered_at: value.registered_at.to_system_time(),
            last_played: value.last_played.map(DateTime::to_system_time),
        }
    }
}

/// Fields written only when the upsert creates the player.
pub fn player_insert_fields(player: &PlayerEntity) -> Document {
    doc! {
        "name": &player.name,
        "registered_at": DateTime::from_system_time(player.registered_at),
        "last_played": player.last_played.map(DateTime::from_system_time),
    }
}

/// BSON has no unsigned integers, so counters are stored as `i64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreDocument {
    #[serde(rename = "_id")]
    id: String,
    player_id: String,
    reaction_time_ms: i64,
    score: i64,
    lights: i32,
    finalized_at: DateTime,
}

impl TryFrom<MongoScoreDocument> for ScoreRecordEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoScoreDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|source| MongoDaoError::InvalidRecordId {
            id: value.id.clone(),
            source,
        })?;

        Ok(Self {
            id,
            player_id: value.player_id,
            reaction_time_ms: u64::try_from(value.reaction_time_ms).unwrap_or_default(),
            score: u32::try_from(value.score).unwrap_or_default(),
            lights: u8::try_from(value.lights).unwrap_or_default(),
            finalized_at: value.finalized_at.to_system_time(),
        })
    }
}

pub fn score_insert_fields(record: &ScoreRecordEntity) -> Document {
    doc! {
        "player_id": &record.player_id,
        "reaction_time_ms": i64::try_from(record.reaction_time_ms).unwrap_or(i64::MAX),
        "score": i64::from(record.score),
        "lights": i32::from(record.lights),
        "finalized_at": DateTime::from_system_time(record.finalized_at),
    }
}

pub fn doc_id(id: &str) -> Document {
    doc! {"_id": id}
}

pub fn record_doc_id(id: Uuid) -> Document {
    doc_id(&id.hyphenated().to_string())
}
