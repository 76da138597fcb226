use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Discordinate Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::list_community_sessions,
        crate::routes::sessions::join_queue,
        crate::routes::sessions::session_status,
        crate::routes::sessions::register,
        crate::routes::sessions::press,
        crate::routes::configs::list_configs,
        crate::routes::configs::create_config,
        crate::routes::leaderboard::final_scores,
        crate::routes::sse::session_stream,
        crate::routes::sse::final_score_stream,
        crate::routes::websocket::buttons_ws,
        crate::routes::websocket::session_buttons_ws,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::VisibleSessionPhase,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinQueueRequest,
            crate::dto::session::JoinQueueResponse,
            crate::dto::session::RegistrationRequest,
            crate::dto::session::RegistrationResponse,
            crate::dto::session::RegistrationStatus,
            crate::dto::session::SessionStatusResponse,
            crate::dto::session::SessionSummary,
            crate::dto::session::CommunitySessionsResponse,
            crate::dto::press::PressRequest,
            crate::dto::press::PressResponse,
            crate::dto::press::PressRejectionReason,
            crate::dto::config::CreateSessionConfigRequest,
            crate::dto::config::SessionConfigResponse,
            crate::dto::leaderboard::FinalScoreEntry,
            crate::dto::sse::Handshake,
            crate::dto::sse::SessionUpdateEvent,
            crate::dto::sse::SessionUpdateKind,
            crate::dto::ws::ButtonInboundMessage,
            crate::dto::ws::ButtonOutboundMessage,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session lifecycle, registrations and presses"),
        (name = "configs", description = "Session configs"),
        (name = "leaderboard", description = "Final scores"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "buttons", description = "WebSocket operations for button clients"),
    )
)]
pub struct ApiDoc;
