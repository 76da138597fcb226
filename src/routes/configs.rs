use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use axum_valid::Valid;

use crate::{
    dto::config::{CreateSessionConfigRequest, SessionConfigResponse},
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes managing session configs.
pub fn router() -> Router<SharedState> {
    Router::new().route("/session-configs", get(list_configs).post(create_config))
}

/// List the known session configs, the default one first.
#[utoipa::path(
    get,
    path = "/session-configs",
    tag = "configs",
    responses(
        (status = 200, description = "Session configs", body = [SessionConfigResponse])
    )
)]
pub async fn list_configs(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionConfigResponse>>, AppError> {
    Ok(Json(session_service::list_configs(&state).await?))
}

/// Create a session config.
#[utoipa::path(
    post,
    path = "/session-configs",
    tag = "configs",
    request_body = CreateSessionConfigRequest,
    responses(
        (status = 201, description = "Config created", body = SessionConfigResponse),
        (status = 400, description = "Invalid durations")
    )
)]
pub async fn create_config(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionConfigRequest>>,
) -> Result<(StatusCode, Json<SessionConfigResponse>), AppError> {
    let config = session_service::create_config(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(config)))
}
