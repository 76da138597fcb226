use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::SessionEntity,
    dto::{
        format_system_time, format_time, phase::VisibleSessionPhase,
        validation::validate_timestamp,
    },
    state::{
        hub::SessionUpdate,
        scheduler::SessionHandle,
        state_machine::RegistrationOutcome,
    },
};

/// Payload used to schedule a session for a community.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// Countdown start, RFC 3339.
    pub scheduled_at: String,
    /// Config to run with; the default config when omitted.
    #[serde(default)]
    pub config_id: Option<Uuid>,
    /// User creating the session.
    pub creator_id: Uuid,
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_timestamp(&self.scheduled_at) {
            errors.add("scheduled_at", e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Payload of a queue join.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinQueueRequest {
    pub user_id: Uuid,
}

/// Payload of a registration.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RegistrationRequest {
    pub user_id: Uuid,
}

/// Outcome of a registration attempt.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// The user was added.
    Registered,
    /// The user was already registered; nothing changed.
    AlreadyRegistered,
}

impl From<RegistrationOutcome> for RegistrationStatus {
    fn from(value: RegistrationOutcome) -> Self {
        match value {
            RegistrationOutcome::Registered => RegistrationStatus::Registered,
            RegistrationOutcome::AlreadyRegistered => RegistrationStatus::AlreadyRegistered,
        }
    }
}

/// Response to a registration.
#[derive(Debug, Serialize, ToSchema)]
pub struct RegistrationResponse {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub status: RegistrationStatus,
}

/// Response to a queue join.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinQueueResponse {
    /// Whether the join opened a new session.
    pub created: bool,
    pub status: RegistrationStatus,
    pub session: SessionStatusResponse,
}

/// Polling view of a session, computed at read time.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionStatusResponse {
    pub session_id: Uuid,
    pub community_id: Uuid,
    pub phase: VisibleSessionPhase,
    /// Seconds left in the current phase.
    pub seconds_remaining: f64,
    /// Fraction of the phase elapsed (countdown) or left (button phase).
    pub progress: f64,
    pub current_score: u32,
    pub final_score: Option<u32>,
    /// Number of registered users.
    pub registered: usize,
    pub scheduled_at: String,
    pub ends_at: String,
    pub config_id: Uuid,
}

impl SessionStatusResponse {
    /// Build the view of a live session from its latest update.
    pub fn from_update(handle: &SessionHandle, update: &SessionUpdate) -> Self {
        let config = handle.config();
        Self {
            session_id: update.session_id,
            community_id: update.community_id,
            phase: update.phase.into(),
            seconds_remaining: update.seconds_remaining,
            progress: update.progress,
            current_score: update.current_score,
            final_score: update.final_score,
            registered: update.registered,
            scheduled_at: format_time(handle.scheduled_at()),
            ends_at: format_time(handle.ends_at()),
            config_id: config.id,
        }
    }

    /// Build the view of an ended session that is no longer kept in memory.
    pub fn ended(entity: &SessionEntity, final_score: u32, registered: usize) -> Self {
        Self {
            session_id: entity.id,
            community_id: entity.community_id,
            phase: VisibleSessionPhase::Ended,
            seconds_remaining: 0.0,
            progress: 0.0,
            current_score: entity.current_score.max(final_score),
            final_score: Some(final_score),
            registered,
            scheduled_at: format_system_time(entity.scheduled_at),
            ends_at: format_system_time(entity.ends_at),
            config_id: entity.config_id,
        }
    }
}

/// Compact session row for community listings.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub scheduled_at: String,
    pub ends_at: String,
    pub current_score: u32,
    pub final_score: Option<u32>,
    pub created_by: Uuid,
    pub started_by: Option<Uuid>,
}

impl From<&SessionHandle> for SessionSummary {
    fn from(value: &SessionHandle) -> Self {
        let snapshot = value.snapshot();
        Self {
            session_id: value.session_id(),
            scheduled_at: format_time(value.scheduled_at()),
            ends_at: format_time(value.ends_at()),
            current_score: snapshot.current_score,
            final_score: snapshot.final_score,
            created_by: value.created_by(),
            started_by: value.started_by(),
        }
    }
}

impl From<&SessionEntity> for SessionSummary {
    fn from(value: &SessionEntity) -> Self {
        Self {
            session_id: value.id,
            scheduled_at: format_system_time(value.scheduled_at),
            ends_at: format_system_time(value.ends_at),
            current_score: value.current_score,
            final_score: value.final_score,
            created_by: value.created_by,
            started_by: value.started_by,
        }
    }
}

/// Sessions of a community split by lifecycle stage.
#[derive(Debug, Serialize, ToSchema, Default)]
pub struct CommunitySessionsResponse {
    /// Not started yet.
    pub upcoming: Vec<SessionSummary>,
    /// Started and not ended.
    pub ongoing: Vec<SessionSummary>,
    /// Ended, most recent first.
    pub past: Vec<SessionSummary>,
}
