use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::race::{RaceSessionResponse, TriggerOutcomeDto};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from trigger pad WebSocket clients.
#[serde(tag = "type")]
pub enum TriggerPadInboundMessage {
    /// Must be the first message: binds the socket to a race session.
    #[serde(rename = "identification")]
    Identification { session_id: Uuid },
    /// Start (or restart) the light sequence.
    #[serde(rename = "arm")]
    Arm,
    /// Reaction signal.
    #[serde(rename = "trigger")]
    Trigger,
    #[serde(other)]
    Unknown,
}

impl TriggerPadInboundMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages pushed to trigger pads.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerPadOutboundMessage {
    /// Positive acknowledgement after identification.
    Ack { session_id: Uuid, status: String },
    /// Answer to `arm` / `trigger`.
    Feedback(TriggerPadFeedback),
    /// Request rejected; the connection stays open.
    Error { message: String },
}

#[derive(Debug, Serialize, ToSchema)]
/// Outcome of an `arm` or `trigger` message.
pub struct TriggerPadFeedback {
    /// Set for `trigger` messages only.
    pub outcome: Option<TriggerOutcomeDto>,
    pub session: RaceSessionResponse,
}
