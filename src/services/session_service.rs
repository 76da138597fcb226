//! Session lifecycle: creation, queue joins, registrations, presses and reads.
//!
//! Writes that touch a running session are routed to its scheduler task
//! through [`SessionHandle`]; reads are answered from the latest snapshot and
//! a fresh phase evaluation, falling back to the store for sessions that are
//! no longer kept in memory.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        models::{SessionConfigEntity, SessionEntity},
        session_store::SessionStore,
    },
    dto::{
        config::{CreateSessionConfigRequest, SessionConfigResponse},
        leaderboard::{FinalScoreEntry, FinalScoreQuery},
        session::{
            CommunitySessionsResponse, CreateSessionRequest, JoinQueueRequest, JoinQueueResponse,
            RegistrationResponse, SessionStatusResponse, SessionSummary,
        },
        validation::parse_timestamp,
    },
    error::ServiceError,
    services::recovery,
    state::{
        SharedState,
        phase_clock::Phase,
        scheduler::{PressAccepted, SessionHandle},
        session::{Session, SessionConfig},
        state_machine::{PressRejection, RegistrationError, SessionMachine},
    },
};

/// Schedule a new session for `community_id`.
///
/// Rejected when the instant is in the past or when another session of the
/// community starts within the creation guard window.
pub async fn create_session(
    state: &SharedState,
    community_id: Uuid,
    payload: CreateSessionRequest,
) -> Result<SessionStatusResponse, ServiceError> {
    let scheduled_at = parse_timestamp(&payload.scheduled_at)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let now = state.now();
    if scheduled_at < now {
        return Err(ServiceError::InvalidInput(
            "scheduled_at must not be in the past".into(),
        ));
    }

    let store = require_store(state).await?;
    let config = resolve_config(state, &store, payload.config_id).await?;

    let _gate = state.creation_gate().await;
    let existing = community_start_times(&store, community_id).await?;
    let guard = creation_guard(state);
    if let Some(conflict) = guard_conflict(&existing, scheduled_at, guard) {
        return Err(ServiceError::Conflict(format!(
            "community already has a session starting at {conflict}"
        )));
    }

    let session = Session::new(
        community_id,
        scheduled_at,
        config,
        payload.creator_id,
        None,
        now,
    );
    let handle = open_session(state, &store, session).await?;
    Ok(SessionStatusResponse::from_update(
        &handle,
        &handle.status_at(state.now()),
    ))
}

/// Join the queue of a community.
///
/// Registers the user to the next session still accepting registrations, or
/// opens one `queue_lead` from now (after any session blocking the guard
/// window) started by this user.
pub async fn join_queue(
    state: &SharedState,
    community_id: Uuid,
    payload: JoinQueueRequest,
) -> Result<JoinQueueResponse, ServiceError> {
    let user_id = payload.user_id;
    let store = require_store(state).await?;

    let (handle, created) = {
        let _gate = state.creation_gate().await;
        let now = state.now();
        let open = state
            .community_sessions(community_id)
            .into_iter()
            .find(|handle| handle.status_at(now).phase.accepts_registrations());

        match open {
            Some(handle) => (handle, false),
            None => {
                let existing = community_start_times(&store, community_id).await?;
                let guard = creation_guard(state);
                let mut scheduled_at = now + lead(state);
                while let Some(conflict) = guard_conflict(&existing, scheduled_at, guard) {
                    scheduled_at = conflict + guard;
                }

                let config = state.default_config().await;
                let session =
                    Session::new(community_id, scheduled_at, config, user_id, Some(user_id), now);
                info!(
                    community_id = %community_id,
                    user_id = %user_id,
                    scheduled_at = %scheduled_at,
                    "queue join opened a session"
                );
                (open_session(state, &store, session).await?, true)
            }
        }
    };

    let outcome = handle.register(user_id).await?;
    Ok(JoinQueueResponse {
        created,
        status: outcome.into(),
        session: SessionStatusResponse::from_update(&handle, &handle.status_at(state.now())),
    })
}

/// Register `user_id` to a session that has not reached its button phase.
pub async fn register(
    state: &SharedState,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<RegistrationResponse, ServiceError> {
    let Some(handle) = live_session(state, session_id).await? else {
        return Err(RegistrationError::TooLate {
            phase: Phase::Ended,
        }
        .into());
    };

    let outcome = handle.register(user_id).await?;
    debug!(session_id = %session_id, user_id = %user_id, ?outcome, "registration handled");
    Ok(RegistrationResponse {
        session_id,
        user_id,
        status: outcome.into(),
    })
}

/// Submit a button press.
///
/// The press is timestamped by the server when the session task handles it.
pub async fn press(
    state: &SharedState,
    session_id: Option<Uuid>,
    user_id: Option<Uuid>,
) -> Result<PressAccepted, ServiceError> {
    let session_id =
        session_id.ok_or_else(|| ServiceError::InvalidInput("session_id is required".into()))?;
    let user_id =
        user_id.ok_or_else(|| ServiceError::InvalidInput("user_id is required".into()))?;

    let Some(handle) = live_session(state, session_id).await? else {
        return Err(PressRejection::NotButtonPhase {
            phase: Phase::Ended,
        }
        .into());
    };
    handle.press(user_id).await
}

/// Current view of a session, evaluated at read time.
pub async fn status(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionStatusResponse, ServiceError> {
    if let Some(handle) = state.session(session_id) {
        return live_status(state, &handle).await;
    }

    let store = require_store(state).await?;
    let entity = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))?;

    match entity.final_score {
        Some(final_score) => {
            let registered = store.list_registrations(session_id).await?.len();
            Ok(SessionStatusResponse::ended(&entity, final_score, registered))
        }
        None => {
            let handle = recovery::restore_session(state, &store, entity).await?;
            live_status(state, &handle).await
        }
    }
}

/// Sessions of a community split into upcoming, ongoing and past.
///
/// Served from memory alone while no store is installed.
pub async fn list_community_sessions(
    state: &SharedState,
    community_id: Uuid,
) -> Result<CommunitySessionsResponse, ServiceError> {
    let now = state.now();
    let mut response = CommunitySessionsResponse::default();

    let mut rows: Vec<(Phase, OffsetDateTime, SessionSummary)> = Vec::new();
    match state.store().await {
        Some(store) => {
            for entity in store.list_community_sessions(community_id).await? {
                rows.push(classify_entity(state, &entity, now));
            }
        }
        None => {
            for handle in state.community_sessions(community_id) {
                let update = handle.status_at(now);
                let summary = SessionSummary {
                    current_score: update.current_score,
                    final_score: update.final_score,
                    ..SessionSummary::from(&handle)
                };
                rows.push((update.phase, handle.scheduled_at(), summary));
            }
        }
    }

    rows.sort_by_key(|(_, scheduled_at, _)| *scheduled_at);
    for (phase, _, summary) in rows {
        match phase {
            Phase::Scheduled => response.upcoming.push(summary),
            Phase::Countdown | Phase::ButtonPhase => response.ongoing.push(summary),
            Phase::Ended => response.past.push(summary),
        }
    }
    response.past.reverse();
    Ok(response)
}

/// Every known session config, the default one first.
pub async fn list_configs(state: &SharedState) -> Result<Vec<SessionConfigResponse>, ServiceError> {
    if let Some(store) = state.store().await {
        for entity in store.list_configs().await? {
            if state.cached_config(entity.id).is_none() {
                let config = SessionConfig::from(entity);
                if config.validate().is_ok() && !config.is_default {
                    state.cache_config(Arc::new(config));
                }
            }
        }
    }

    Ok(state
        .cached_configs()
        .iter()
        .map(|config| SessionConfigResponse::from(config.as_ref()))
        .collect())
}

/// Persist a new, validated session config.
pub async fn create_config(
    state: &SharedState,
    payload: CreateSessionConfigRequest,
) -> Result<SessionConfigResponse, ServiceError> {
    let config = SessionConfig::new(
        payload.countdown_seconds,
        payload.button_press_seconds,
        payload.button_press_timeout_seconds,
        payload.score_window_seconds,
    )?;

    let store = require_store(state).await?;
    store.save_config(SessionConfigEntity::from(&config)).await?;
    let config = state.cache_config(Arc::new(config));
    info!(config_id = %config.id, "session config created");
    Ok(SessionConfigResponse::from(config.as_ref()))
}

/// Frozen scores of ended sessions, most recent first.
pub async fn list_final_scores(
    state: &SharedState,
    query: FinalScoreQuery,
) -> Result<Vec<FinalScoreEntry>, ServiceError> {
    let max = state.config().leaderboard_limit;
    let limit = query.limit.unwrap_or(max).clamp(1, max);
    let store = require_store(state).await?;

    Ok(store
        .list_final_scores(query.community_id, limit)
        .await?
        .iter()
        .filter_map(FinalScoreEntry::from_entity)
        .collect())
}

/// Resolve the installed store or report degraded mode.
pub(crate) async fn require_store(
    state: &SharedState,
) -> Result<Arc<dyn SessionStore>, ServiceError> {
    state.store().await.ok_or(ServiceError::Degraded)
}

/// Handle of a session that can still change, restoring it from the store if
/// needed. `Ok(None)` means the session exists but already ended.
pub(crate) async fn live_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Option<SessionHandle>, ServiceError> {
    if let Some(handle) = state.session(session_id) {
        return Ok(Some(handle));
    }

    let store = require_store(state).await?;
    match store.find_session(session_id).await? {
        None => Err(ServiceError::NotFound(format!("session {session_id}"))),
        Some(entity) if entity.final_score.is_some() => Ok(None),
        Some(entity) => Ok(Some(
            recovery::restore_session(state, &store, entity).await?,
        )),
    }
}

async fn live_status(
    state: &SharedState,
    handle: &SessionHandle,
) -> Result<SessionStatusResponse, ServiceError> {
    let mut update = handle.status_at(state.now());
    if update.phase == Phase::Ended && update.final_score.is_none() {
        // The task has not observed the end yet; let it freeze the score.
        update = handle.refresh().await?;
    }
    Ok(SessionStatusResponse::from_update(handle, &update))
}

async fn open_session(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    session: Session,
) -> Result<SessionHandle, ServiceError> {
    store.save_session(SessionEntity::from(&session)).await?;
    info!(
        session_id = %session.id,
        community_id = %session.community_id,
        scheduled_at = %session.scheduled_at,
        config_id = %session.config.id,
        "session created"
    );
    let now = state.now();
    Ok(state.track_session(SessionMachine::new(session, now)))
}

async fn resolve_config(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
    config_id: Option<Uuid>,
) -> Result<Arc<SessionConfig>, ServiceError> {
    let Some(config_id) = config_id else {
        return Ok(state.default_config().await);
    };
    if let Some(config) = state.cached_config(config_id) {
        return Ok(config);
    }

    let entity = store
        .find_config(config_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session config {config_id}")))?;
    let config = SessionConfig::from(entity);
    config.validate()?;
    Ok(state.cache_config(Arc::new(config)))
}

async fn community_start_times(
    store: &Arc<dyn SessionStore>,
    community_id: Uuid,
) -> Result<Vec<OffsetDateTime>, ServiceError> {
    let mut starts: Vec<OffsetDateTime> = store
        .list_community_sessions(community_id)
        .await?
        .into_iter()
        .map(|entity| entity.scheduled_at.into())
        .collect();
    starts.sort();
    Ok(starts)
}

/// First existing start closer than `guard` to `at`, if any.
fn guard_conflict(
    existing: &[OffsetDateTime],
    at: OffsetDateTime,
    guard: Duration,
) -> Option<OffsetDateTime> {
    existing
        .iter()
        .copied()
        .find(|start| (*start - at).abs() < guard)
}

fn creation_guard(state: &SharedState) -> Duration {
    Duration::try_from(state.config().creation_guard).unwrap_or(Duration::MAX)
}

fn lead(state: &SharedState) -> Duration {
    Duration::try_from(state.config().queue_lead).unwrap_or(Duration::ZERO)
}

fn classify_entity(
    state: &SharedState,
    entity: &SessionEntity,
    now: OffsetDateTime,
) -> (Phase, OffsetDateTime, SessionSummary) {
    let scheduled_at = OffsetDateTime::from(entity.scheduled_at);
    let mut summary = SessionSummary::from(entity);

    let phase = match state.session(entity.id) {
        Some(handle) => {
            let update = handle.status_at(now);
            summary.current_score = update.current_score;
            summary.final_score = update.final_score;
            update.phase
        }
        None if entity.final_score.is_some() => Phase::Ended,
        None if now < scheduled_at => Phase::Scheduled,
        None if now < OffsetDateTime::from(entity.ends_at) => Phase::ButtonPhase,
        None => Phase::Ended,
    };
    (phase, scheduled_at, summary)
}
