use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        press::{PressRequest, PressResponse},
        session::{
            CommunitySessionsResponse, CreateSessionRequest, JoinQueueRequest, JoinQueueResponse,
            RegistrationRequest, RegistrationResponse, SessionStatusResponse,
        },
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes driving the session lifecycle.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/communities/{id}/sessions",
            post(create_session).get(list_community_sessions),
        )
        .route("/communities/{id}/queue", post(join_queue))
        .route("/sessions/{id}", get(session_status))
        .route("/sessions/{id}/registrations", post(register))
        .route("/presses", post(press))
}

/// Schedule a session for a community.
#[utoipa::path(
    post,
    path = "/communities/{id}/sessions",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Community identifier")),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session scheduled", body = SessionStatusResponse),
        (status = 400, description = "Malformed or past timestamp"),
        (status = 404, description = "Unknown session config"),
        (status = 409, description = "Another session starts within the guard window"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Path(community_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionStatusResponse>), AppError> {
    let status = session_service::create_session(&state, community_id, payload).await?;
    Ok((StatusCode::CREATED, Json(status)))
}

/// List the upcoming, ongoing and past sessions of a community.
#[utoipa::path(
    get,
    path = "/communities/{id}/sessions",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Community identifier")),
    responses(
        (status = 200, description = "Sessions of the community", body = CommunitySessionsResponse)
    )
)]
pub async fn list_community_sessions(
    State(state): State<SharedState>,
    Path(community_id): Path<Uuid>,
) -> Result<Json<CommunitySessionsResponse>, AppError> {
    Ok(Json(
        session_service::list_community_sessions(&state, community_id).await?,
    ))
}

/// Join the queue of a community, opening a session when none is pending.
#[utoipa::path(
    post,
    path = "/communities/{id}/queue",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Community identifier")),
    request_body = JoinQueueRequest,
    responses(
        (status = 200, description = "User registered to the pending session", body = JoinQueueResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn join_queue(
    State(state): State<SharedState>,
    Path(community_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<JoinQueueRequest>>,
) -> Result<Json<JoinQueueResponse>, AppError> {
    Ok(Json(
        session_service::join_queue(&state, community_id, payload).await?,
    ))
}

/// Read the phase, remaining time, progress and score of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session status", body = SessionStatusResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn session_status(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    Ok(Json(session_service::status(&state, session_id).await?))
}

/// Register a user to a session before its button phase.
#[utoipa::path(
    post,
    path = "/sessions/{id}/registrations",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = RegistrationRequest,
    responses(
        (status = 200, description = "Registration recorded or already present", body = RegistrationResponse),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Registrations are closed")
    )
)]
pub async fn register(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<RegistrationRequest>>,
) -> Result<Json<RegistrationResponse>, AppError> {
    Ok(Json(
        session_service::register(&state, session_id, payload.user_id).await?,
    ))
}

/// Record a button press.
#[utoipa::path(
    post,
    path = "/presses",
    tag = "sessions",
    request_body = PressRequest,
    responses(
        (status = 200, description = "Press accepted", body = PressResponse),
        (status = 400, description = "Missing session or user"),
        (status = 409, description = "Session is not in its button phase"),
        (status = 429, description = "Cooldown active; see Retry-After"),
        (status = 503, description = "Storage unavailable; the press was not recorded")
    )
)]
pub async fn press(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<PressRequest>>,
) -> Result<Json<PressResponse>, AppError> {
    let accepted = session_service::press(&state, payload.session_id, payload.user_id).await?;
    Ok(Json(PressResponse::from(accepted)))
}
