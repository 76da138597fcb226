use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::phase_clock::Phase;

/// Session phase exposed to clients (REST/SSE/WebSocket).
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleSessionPhase {
    /// Countdown has not started; registrations are open.
    Scheduled,
    /// Counting down to the button phase; registrations still open.
    Countdown,
    /// Presses are accepted.
    ButtonPhase,
    /// Score is frozen.
    Ended,
}

impl From<Phase> for VisibleSessionPhase {
    fn from(value: Phase) -> Self {
        match value {
            Phase::Scheduled => VisibleSessionPhase::Scheduled,
            Phase::Countdown => VisibleSessionPhase::Countdown,
            Phase::ButtonPhase => VisibleSessionPhase::ButtonPhase,
            Phase::Ended => VisibleSessionPhase::Ended,
        }
    }
}
