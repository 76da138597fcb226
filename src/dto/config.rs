use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::state::session::SessionConfig;

/// Payload used to create a session config.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionConfigRequest {
    /// Countdown length in seconds.
    #[validate(range(max = 86_400))]
    pub countdown_seconds: u32,
    /// Button phase length in seconds.
    #[validate(range(min = 1, max = 86_400))]
    pub button_press_seconds: u32,
    /// Minimum spacing between two presses of the same user, in seconds.
    #[validate(range(max = 86_400))]
    pub button_press_timeout_seconds: u32,
    /// Width of the scoring window in seconds.
    #[validate(range(min = 1, max = 86_400))]
    pub score_window_seconds: u32,
}

/// Session config as returned by the API.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionConfigResponse {
    pub id: Uuid,
    pub countdown_seconds: u32,
    pub button_press_seconds: u32,
    pub button_press_timeout_seconds: u32,
    pub score_window_seconds: u32,
    /// Whether sessions created without a config use this one.
    pub is_default: bool,
}

impl From<&SessionConfig> for SessionConfigResponse {
    fn from(value: &SessionConfig) -> Self {
        Self {
            id: value.id,
            countdown_seconds: value.countdown_seconds,
            button_press_seconds: value.button_press_seconds,
            button_press_timeout_seconds: value.button_press_timeout_seconds,
            score_window_seconds: value.score_window_seconds,
            is_default: value.is_default,
        }
    }
}
