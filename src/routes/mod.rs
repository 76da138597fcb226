use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub mod configs;
pub mod health;
pub mod leaderboard;
pub mod sessions;
pub mod sse;
pub mod websocket;

/// Compose all route trees under one shared state, with Swagger UI at `/docs`.
pub fn router(state: SharedState) -> Router<()> {
    let swagger: Router<SharedState> = SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", ApiDoc::openapi())
        .into();

    health::router()
        .merge(sse::router())
        .merge(websocket::router())
        .merge(sessions::router())
        .merge(configs::router())
        .merge(leaderboard::router())
        .merge(swagger)
        .with_state(state)
}
