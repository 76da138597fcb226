use std::{convert::Infallible, time::Duration};

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::{
    Stream, StreamExt,
    stream::{self, BoxStream},
};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        leaderboard::FinalScoreEntry,
        sse::{Handshake, ServerEvent, SessionUpdateEvent},
    },
    error::ServiceError,
    services::session_service,
    state::{SharedState, hub::FinalScore},
};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Boxed stream of SSE events handed to axum.
pub type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Stream the state of one session until it ends.
///
/// The first data event carries the latest snapshot; intermediate states a
/// slow client missed are skipped, the newest one is always delivered.
pub async fn session_stream(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Sse<KeepAliveStream<EventStream>>, ServiceError> {
    let events = session_events(state, session_id).await?;
    Ok(with_keep_alive(
        events.map(|event| Ok(to_event(event))).boxed(),
    ))
}

/// Events of one session: a handshake, then every newest state until the end.
///
/// A session no longer held in memory is restored from the store when it is
/// unfinished; an ended one yields its final state once.
pub async fn session_events(
    state: &SharedState,
    session_id: Uuid,
) -> Result<BoxStream<'static, ServerEvent>, ServiceError> {
    let degraded = *state.degraded_watcher().borrow();
    let handshake = handshake("session", degraded);

    if !state.is_tracked(session_id) {
        let status = session_service::status(state, session_id).await?;
        if !state.is_tracked(session_id) {
            let payload = SessionUpdateEvent::final_snapshot(&status);
            let last = ServerEvent::json(Some("session_update".to_string()), &payload).ok();
            return Ok(stream::iter(handshake.into_iter().chain(last)).boxed());
        }
    }

    let handle = state
        .session(session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))?;
    let mut updates = handle.subscribe();

    let events = stream! {
        if let Some(event) = handshake {
            yield event;
        }
        loop {
            let payload = SessionUpdateEvent::from(&*updates.borrow_and_update());
            let ended = payload.final_score.is_some();
            if let Ok(event) = ServerEvent::json(Some("session_update".to_string()), &payload) {
                yield event;
            }
            if ended || updates.changed().await.is_err() {
                break;
            }
        }
        info!(session_id = %session_id, "session SSE stream finished");
    };

    Ok(events.boxed())
}

/// Stream final scores as sessions end, optionally for one community only.
pub fn final_score_stream(
    state: &SharedState,
    community_id: Option<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    let receiver = state.hub().subscribe_final_scores();
    let handshake = handshake("final_scores", *state.degraded_watcher().borrow());
    to_sse_stream(receiver, handshake, community_id)
}

/// Forward a broadcast feed of final scores into an SSE response, stopping
/// once the client disconnects.
fn to_sse_stream(
    mut receiver: broadcast::Receiver<FinalScore>,
    handshake: Option<ServerEvent>,
    community_id: Option<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(event) = handshake {
            if tx.send(Ok(to_event(event))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(score) if matches_community(&score, community_id) => {
                            let entry = FinalScoreEntry::from(&score);
                            let Ok(payload) = ServerEvent::json(Some("final_score".to_string()), &entry) else {
                                continue;
                            };
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Skip lagged messages but keep the stream alive.
                            warn!(skipped, "final score stream lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!("final score SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    with_keep_alive(ReceiverStream::new(rx))
}

fn matches_community(score: &FinalScore, community_id: Option<Uuid>) -> bool {
    community_id.is_none_or(|id| id == score.community_id)
}

fn handshake(stream: &str, degraded: bool) -> Option<ServerEvent> {
    ServerEvent::json(
        Some("handshake".to_string()),
        &Handshake {
            stream: stream.to_string(),
            degraded,
        },
    )
    .ok()
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

fn with_keep_alive<S>(stream: S) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
