use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{format_time, phase::VisibleSessionPhase, session::SessionStatusResponse},
    state::hub::{SessionUpdate, UpdateKind},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the stream (`session` or `final_scores`).
    pub stream: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Reason a session update was emitted.
pub enum SessionUpdateKind {
    Snapshot,
    Tick,
    PhaseChanged,
    ScoreChanged,
    Registration,
    Ended,
}

impl From<UpdateKind> for SessionUpdateKind {
    fn from(value: UpdateKind) -> Self {
        match value {
            UpdateKind::Snapshot => SessionUpdateKind::Snapshot,
            UpdateKind::Tick => SessionUpdateKind::Tick,
            UpdateKind::PhaseChanged => SessionUpdateKind::PhaseChanged,
            UpdateKind::ScoreChanged => SessionUpdateKind::ScoreChanged,
            UpdateKind::Registration => SessionUpdateKind::Registration,
            UpdateKind::Ended => SessionUpdateKind::Ended,
        }
    }
}

#[derive(Debug, Serialize, ToSchema, Clone)]
/// Pushed to session subscribers whenever the session state changes.
pub struct SessionUpdateEvent {
    pub session_id: Uuid,
    pub kind: SessionUpdateKind,
    pub phase: VisibleSessionPhase,
    pub seconds_remaining: f64,
    pub progress: f64,
    pub current_score: u32,
    pub final_score: Option<u32>,
    pub registered: usize,
    /// Server instant the values were computed at.
    pub emitted_at: String,
}

impl SessionUpdateEvent {
    /// Last state of a session that is only known from storage.
    pub fn final_snapshot(status: &SessionStatusResponse) -> Self {
        Self {
            session_id: status.session_id,
            kind: SessionUpdateKind::Ended,
            phase: status.phase,
            seconds_remaining: status.seconds_remaining,
            progress: status.progress,
            current_score: status.current_score,
            final_score: status.final_score,
            registered: status.registered,
            emitted_at: status.ends_at.clone(),
        }
    }
}

impl From<&SessionUpdate> for SessionUpdateEvent {
    fn from(value: &SessionUpdate) -> Self {
        Self {
            session_id: value.session_id,
            kind: value.kind.into(),
            phase: value.phase.into(),
            seconds_remaining: value.seconds_remaining,
            progress: value.progress,
            current_score: value.current_score,
            final_score: value.final_score,
            registered: value.registered,
            emitted_at: format_time(value.emitted_at),
        }
    }
}
