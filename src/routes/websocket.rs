use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{services::websocket_service, state::SharedState};

/// User a session-bound button connection presses for.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ButtonQuery {
    pub user_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/ws",
    tag = "buttons",
    responses((status = 101, description = "Switching protocols; the first frame must identify the session and user"))
)]
/// Upgrade into a button connection that identifies itself in its first frame.
pub async fn buttons_ws(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_service::handle_socket(state, socket, None))
}

#[utoipa::path(
    get,
    path = "/ws/sessions/{session_id}",
    tag = "buttons",
    params(("session_id" = Uuid, Path, description = "Session to press in"), ButtonQuery),
    responses((status = 101, description = "Switching protocols; the connection is already bound"))
)]
/// Upgrade into a button connection bound to a session and user from the URL.
pub async fn session_buttons_ws(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ButtonQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let binding = Some((session_id, query.user_id));
    ws.on_upgrade(move |socket| websocket_service::handle_socket(state, socket, binding))
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/ws", get(buttons_ws))
        .route("/ws/sessions/{session_id}", get(session_buttons_ws))
}
