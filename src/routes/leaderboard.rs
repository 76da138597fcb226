use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dto::leaderboard::{FinalScoreEntry, FinalScoreQuery},
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes exposing final scores.
pub fn router() -> Router<SharedState> {
    Router::new().route("/leaderboard/final-scores", get(final_scores))
}

/// Final scores of ended sessions, most recent first.
#[utoipa::path(
    get,
    path = "/leaderboard/final-scores",
    tag = "leaderboard",
    params(FinalScoreQuery),
    responses(
        (status = 200, description = "Final scores", body = [FinalScoreEntry]),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn final_scores(
    State(state): State<SharedState>,
    Query(query): Query<FinalScoreQuery>,
) -> Result<Json<Vec<FinalScoreEntry>>, AppError> {
    Ok(Json(session_service::list_final_scores(&state, query).await?))
}
