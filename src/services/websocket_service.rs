use std::{future::pending, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        press::PressResponse,
        sse::SessionUpdateEvent,
        ws::{ButtonInboundMessage, ButtonOutboundMessage},
    },
    error::ServiceError,
    services::session_service,
    state::{SharedState, hub::SessionUpdate, scheduler::SessionHandle},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_CAPACITY: usize = 32;

/// Reasons an identification is refused before the connection is bound.
#[derive(Debug, Error)]
enum IdentificationError {
    /// The first frame was not a valid identification message.
    #[error("first message must be an identification")]
    NotIdentification,
    /// The session exists but already ended.
    #[error("session {0} has ended")]
    Ended(Uuid),
    /// Lookup of the session failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Work queued for the writer task.
enum Outbound {
    /// A frame that must reach the client.
    Frame(Message),
    /// Start pushing the newest state of a session.
    Follow(watch::Receiver<SessionUpdate>),
}

/// Handle the full lifecycle of a button WebSocket connection.
///
/// The client identifies with a session and a user, either through `binding`
/// taken from the upgrade request or through its first frame, then sends
/// presses; the server answers each press with feedback and pushes session
/// updates, only ever the newest one when the socket falls behind.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    binding: Option<(Uuid, Uuid)>,
) {
    let (sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(write_frames(sender, outbound_rx));

    let (session_id, user_id) = match binding {
        Some(bound) => bound,
        None => match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match parse_identification(&text) {
                Ok(bound) => bound,
                Err(err) => {
                    refuse(&outbound_tx, &err).await;
                    finalize(writer_task, outbound_tx).await;
                    return;
                }
            },
            Ok(Some(Ok(Message::Close(_)))) => {
                finalize(writer_task, outbound_tx).await;
                return;
            }
            Ok(Some(Ok(_))) => {
                let _ = send_frame(&outbound_tx, Message::Close(None)).await;
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
        },
    };

    let handle = match bind(&state, session_id).await {
        Ok(handle) => handle,
        Err(err) => {
            refuse(&outbound_tx, &err).await;
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };
    let session_id = handle.session_id();

    let ack = ButtonOutboundMessage::Ack {
        session_id,
        user_id,
    };
    if send_message(&outbound_tx, &ack).await.is_err()
        || outbound_tx
            .send(Outbound::Follow(handle.subscribe()))
            .await
            .is_err()
    {
        finalize(writer_task, outbound_tx).await;
        return;
    }
    info!(session_id = %session_id, user_id = %user_id, "button client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ButtonInboundMessage::from_json_str(&text) {
                Ok(ButtonInboundMessage::Press) => {
                    let feedback =
                        match session_service::press(&state, Some(session_id), Some(user_id)).await
                        {
                            Ok(accepted) => PressResponse::from(accepted),
                            Err(err) => {
                                debug!(session_id = %session_id, user_id = %user_id, error = %err, "press not recorded");
                                PressResponse::rejected(Some(session_id), Some(user_id), &err)
                            }
                        };
                    let message = ButtonOutboundMessage::PressFeedback(feedback);
                    if send_message(&outbound_tx, &message).await.is_err() {
                        info!(session_id = %session_id, user_id = %user_id, "connection closed during press feedback, terminating");
                        break;
                    }
                }
                Ok(ButtonInboundMessage::Identification { .. }) => {
                    warn!(session_id = %session_id, user_id = %user_id, "ignoring duplicate identification message");
                }
                Ok(ButtonInboundMessage::Unknown) => {
                    warn!(session_id = %session_id, user_id = %user_id, "ignoring unknown message type");
                }
                Err(err) => {
                    warn!(session_id = %session_id, user_id = %user_id, error = %err, "failed to parse button message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = send_frame(&outbound_tx, Message::Pong(payload)).await;
            }
            Ok(Message::Close(frame)) => {
                info!(session_id = %session_id, user_id = %user_id, "button client closed");
                let _ = send_frame(&outbound_tx, Message::Close(frame)).await;
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(session_id = %session_id, user_id = %user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    info!(session_id = %session_id, user_id = %user_id, "button client disconnected");
    finalize(writer_task, outbound_tx).await;
}

fn parse_identification(text: &str) -> Result<(Uuid, Uuid), IdentificationError> {
    match ButtonInboundMessage::from_json_str(text) {
        Ok(ButtonInboundMessage::Identification {
            session_id,
            user_id,
        }) => Ok((session_id, user_id)),
        _ => Err(IdentificationError::NotIdentification),
    }
}

/// Resolve the live session a connection is bound to.
async fn bind(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionHandle, IdentificationError> {
    session_service::live_session(state, session_id)
        .await?
        .ok_or(IdentificationError::Ended(session_id))
}

/// Report why the connection is refused, then close it.
async fn refuse(tx: &mpsc::Sender<Outbound>, err: &IdentificationError) {
    warn!(error = %err, "button client identification refused");
    let message = ButtonOutboundMessage::Error {
        message: err.to_string(),
    };
    let _ = send_message(tx, &message).await;
    let _ = send_frame(tx, Message::Close(None)).await;
}

/// Drain queued frames and session updates into the socket until either side closes.
async fn write_frames<S>(mut sink: S, mut outbound: mpsc::Receiver<Outbound>)
where
    S: Sink<Message> + Unpin,
{
    let mut updates = None;
    while let Some(message) = next_frame(&mut outbound, &mut updates).await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

/// Next frame to write: queued frames first, then the newest session state.
///
/// Session updates are never queued; however many changes happened since the
/// last write, a single frame carrying the latest one is produced.
async fn next_frame(
    outbound: &mut mpsc::Receiver<Outbound>,
    updates: &mut Option<watch::Receiver<SessionUpdate>>,
) -> Option<Message> {
    enum Next {
        Queued(Option<Outbound>),
        Changed(bool),
    }

    loop {
        let next = {
            let changed = async {
                match updates.as_mut() {
                    Some(receiver) => receiver.changed().await.is_ok(),
                    None => pending().await,
                }
            };
            tokio::select! {
                biased;
                queued = outbound.recv() => Next::Queued(queued),
                open = changed => Next::Changed(open),
            }
        };

        match next {
            Next::Queued(None) => return None,
            Next::Queued(Some(Outbound::Frame(message))) => return Some(message),
            Next::Queued(Some(Outbound::Follow(mut receiver))) => {
                receiver.mark_changed();
                *updates = Some(receiver);
            }
            Next::Changed(false) => *updates = None,
            Next::Changed(true) => {
                let Some(receiver) = updates.as_mut() else {
                    continue;
                };
                let event = SessionUpdateEvent::from(&*receiver.borrow_and_update());
                if event.final_score.is_some() {
                    *updates = None;
                }
                if let Some(message) = encode(&ButtonOutboundMessage::SessionUpdate(event)) {
                    return Some(message);
                }
            }
        }
    }
}

/// Serialize a payload into a text frame, logging and skipping failures.
fn encode<T>(value: &T) -> Option<Message>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    match serde_json::to_string(value) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            None
        }
    }
}

/// Serialize a payload and push it onto the WebSocket writer.
///
/// Serialization failures are logged and swallowed; `Err` means the writer is gone.
async fn send_message<T>(tx: &mpsc::Sender<Outbound>, value: &T) -> Result<(), ()>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    match encode(value) {
        Some(message) => send_frame(tx, message).await,
        None => Ok(()),
    }
}

async fn send_frame(tx: &mpsc::Sender<Outbound>, message: Message) -> Result<(), ()> {
    tx.send(Outbound::Frame(message)).await.map_err(|_| ())
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::Sender<Outbound>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::state::{hub::UpdateKind, phase_clock::Phase};

    fn update(session_id: Uuid, current_score: u32, final_score: Option<u32>) -> SessionUpdate {
        SessionUpdate {
            session_id,
            community_id: Uuid::new_v4(),
            phase: Phase::ButtonPhase,
            seconds_remaining: 10.0,
            progress: 0.5,
            current_score,
            final_score,
            registered: 3,
            kind: UpdateKind::ScoreChanged,
            emitted_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn text(message: Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn nothing_pending(
        outbound: &mut mpsc::Receiver<Outbound>,
        updates: &mut Option<watch::Receiver<SessionUpdate>>,
    ) -> bool {
        tokio::time::timeout(Duration::from_millis(20), next_frame(outbound, updates))
            .await
            .is_err()
    }

    #[tokio::test]
    async fn stalled_writer_only_sees_the_newest_update() {
        let session_id = Uuid::new_v4();
        let (publisher, receiver) = watch::channel(update(session_id, 0, None));
        let (tx, mut outbound) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut updates = None;

        tx.send(Outbound::Follow(receiver)).await.unwrap();
        for score in 1..=500 {
            publisher.send_replace(update(session_id, score, None));
        }

        let frame = text(next_frame(&mut outbound, &mut updates).await.unwrap());
        assert_eq!(frame["type"], "session_update");
        assert_eq!(frame["current_score"], 500);
        assert!(nothing_pending(&mut outbound, &mut updates).await);
    }

    #[tokio::test]
    async fn queued_frames_go_out_before_updates() {
        let session_id = Uuid::new_v4();
        let (publisher, receiver) = watch::channel(update(session_id, 1, None));
        let (tx, mut outbound) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut updates = Some(receiver);

        publisher.send_replace(update(session_id, 2, None));
        send_message(
            &tx,
            &ButtonOutboundMessage::Error {
                message: "late".into(),
            },
        )
        .await
        .unwrap();

        let first = text(next_frame(&mut outbound, &mut updates).await.unwrap());
        assert_eq!(first["type"], "error");
        let second = text(next_frame(&mut outbound, &mut updates).await.unwrap());
        assert_eq!(second["current_score"], 2);
    }

    #[tokio::test]
    async fn updates_stop_after_the_final_score() {
        let session_id = Uuid::new_v4();
        let (publisher, receiver) = watch::channel(update(session_id, 4, Some(4)));
        let (tx, mut outbound) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut updates = None;

        tx.send(Outbound::Follow(receiver)).await.unwrap();
        let frame = text(next_frame(&mut outbound, &mut updates).await.unwrap());
        assert_eq!(frame["final_score"], 4);
        assert!(updates.is_none());

        publisher.send_replace(update(session_id, 4, Some(4)));
        assert!(nothing_pending(&mut outbound, &mut updates).await);

        drop(tx);
        assert!(next_frame(&mut outbound, &mut updates).await.is_none());
    }
}
