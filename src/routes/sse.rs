use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAliveStream, Sse},
    routing::get,
};
use futures::Stream;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    error::AppError,
    services::sse_service::{self, EventStream},
    state::SharedState,
};

/// Optional community filter of the final score stream.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FinalScoreStreamQuery {
    /// Only forward scores of this community.
    pub community_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session update stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown session"),
        (status = 503, description = "Session not in memory and storage unavailable")
    )
)]
/// Stream updates of a session until it ends; an ended session sends its final state once.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<KeepAliveStream<EventStream>>, AppError> {
    let stream = sse_service::session_stream(&state, session_id).await?;
    info!(session_id = %session_id, "New session SSE connection");
    Ok(stream)
}

#[utoipa::path(
    get,
    path = "/sse/final-scores",
    tag = "sse",
    params(FinalScoreStreamQuery),
    responses((status = 200, description = "Final score stream", content_type = "text/event-stream", body = String))
)]
/// Stream final scores as sessions end.
pub async fn final_score_stream(
    State(state): State<SharedState>,
    Query(query): Query<FinalScoreStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(community_id = ?query.community_id, "New final score SSE connection");
    sse_service::final_score_stream(&state, query.community_id)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/sessions/{id}", get(session_stream))
        .route("/sse/final-scores", get(final_score_stream))
}
