use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{TriggerPadFeedback, TriggerPadInboundMessage, TriggerPadOutboundMessage},
    error::ServiceError,
    services::race_service,
    state::SharedState,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while serving a trigger pad message.
#[derive(Debug, Error)]
enum PadError {
    /// Writer channel closed; the connection should be terminated.
    #[error("connection closed")]
    ConnectionClosed,
    /// Race use-case rejected the request.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Handle the full lifecycle of a trigger pad WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Writer task keeps outbound frames flowing while we await inbound ones.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let session_id = match TriggerPadInboundMessage::from_json_str(&initial_message) {
        Ok(TriggerPadInboundMessage::Identification { session_id }) => session_id,
        Ok(_) => {
            warn!("first message was not identification");
            reject(&outbound_tx, "identification expected");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to parse trigger pad message");
            reject(&outbound_tx, "malformed identification");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    if state.races().get(&session_id).is_none() {
        warn!(session_id = %session_id, "trigger pad identified with unknown session");
        reject(&outbound_tx, &format!("unknown race session `{session_id}`"));
        finalize(writer_task, outbound_tx).await;
        return;
    }

    let ack = TriggerPadOutboundMessage::Ack {
        session_id,
        status: "paired".to_string(),
    };
    if send_message(&outbound_tx, &ack).is_err() {
        finalize(writer_task, outbound_tx).await;
        return;
    }
    info!(session_id = %session_id, "trigger pad connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let result = match TriggerPadInboundMessage::from_json_str(&text) {
                    Ok(TriggerPadInboundMessage::Trigger) => {
                        handle_trigger(&state, session_id, &outbound_tx).await
                    }
                    Ok(TriggerPadInboundMessage::Arm) => {
                        handle_arm(&state, session_id, &outbound_tx).await
                    }
                    Ok(TriggerPadInboundMessage::Identification { .. }) => {
                        warn!(session_id = %session_id, "ignoring duplicate identification message");
                        Ok(())
                    }
                    Ok(TriggerPadInboundMessage::Unknown) => send_error(&outbound_tx, "unsupported message type"),
                    Err(err) => {
                        warn!(session_id = %session_id, error = %err, "failed to parse trigger pad message");
                        send_error(&outbound_tx, "malformed message")
                    }
                };

                match result {
                    Ok(()) => {}
                    Err(PadError::ConnectionClosed) => break,
                    Err(PadError::Service(err)) => {
                        warn!(session_id = %session_id, error = %err, "trigger pad request failed");
                        let closed = matches!(err, ServiceError::NotFound(_));
                        if send_error(&outbound_tx, &err.to_string()).is_err() || closed {
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(session_id = %session_id, "trigger pad closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "websocket error");
                break;
            }
        }
    }

    info!(session_id = %session_id, "trigger pad disconnected");
    finalize(writer_task, outbound_tx).await;
}

async fn handle_trigger(
    state: &SharedState,
    session_id: Uuid,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), PadError> {
    let response = race_service::trigger(state, session_id).await?;
    let feedback = TriggerPadOutboundMessage::Feedback(TriggerPadFeedback {
        outcome: Some(response.outcome),
        session: response.session,
    });
    send_message(tx, &feedback)
}

async fn handle_arm(
    state: &SharedState,
    session_id: Uuid,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), PadError> {
    let session = race_service::arm(state, session_id).await?;
    let feedback = TriggerPadOutboundMessage::Feedback(TriggerPadFeedback {
        outcome: None,
        session,
    });
    send_message(tx, &feedback)
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, message: &str) -> Result<(), PadError> {
    send_message(
        tx,
        &TriggerPadOutboundMessage::Error {
            message: message.to_string(),
        },
    )
}

/// Send an error frame followed by a close frame.
fn reject(tx: &mpsc::UnboundedSender<Message>, message: &str) {
    let _ = send_error(tx, message);
    let _ = tx.send(Message::Close(None));
}

/// Serialize a payload and queue it on the writer channel.
///
/// Serialization failures are logged and swallowed; only a closed writer is reported.
fn send_message(
    tx: &mpsc::UnboundedSender<Message>,
    value: &TriggerPadOutboundMessage,
) -> Result<(), PadError> {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize trigger pad message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| PadError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::AppState};

    fn frame_json(message: Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn arm_answers_with_feedback() {
        let state = AppState::new(AppConfig::default());
        let session = state.races().create("driver@gmail.com".into());
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_arm(&state, session.id(), &tx).await.unwrap();
        let body = frame_json(rx.recv().await.unwrap());
        assert_eq!(body["type"], "feedback");
        assert!(body["outcome"].is_null());
        assert_eq!(body["session"]["phase"], "arming");
    }

    #[tokio::test]
    async fn idle_trigger_reports_its_outcome() {
        let state = AppState::new(AppConfig::default());
        let session = state.races().create("driver@gmail.com".into());
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_trigger(&state, session.id(), &tx).await.unwrap();
        let body = frame_json(rx.recv().await.unwrap());
        assert_eq!(body["type"], "feedback");
        assert_eq!(body["outcome"], "started");
    }

    #[tokio::test]
    async fn unknown_session_is_a_service_error() {
        let state = AppState::new(AppConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = handle_trigger(&state, Uuid::new_v4(), &tx).await.unwrap_err();
        assert!(matches!(err, PadError::Service(ServiceError::NotFound(_))));
    }

    #[test]
    fn closed_writer_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(matches!(
            send_error(&tx, "boom"),
            Err(PadError::ConnectionClosed)
        ));
    }
}
