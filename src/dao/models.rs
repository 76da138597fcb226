use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Persisted phase durations and scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfigEntity {
    /// Stable identifier for the config.
    pub id: Uuid,
    /// Countdown length in seconds.
    pub countdown_seconds: u32,
    /// Button phase length in seconds.
    pub button_press_seconds: u32,
    /// Per-user cooldown in seconds.
    pub button_press_timeout_seconds: u32,
    /// Scoring window in seconds.
    pub score_window_seconds: u32,
    /// Whether the config is the default one.
    pub is_default: bool,
}

/// Session row persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Owning community.
    pub community_id: Uuid,
    /// Countdown start.
    pub scheduled_at: SystemTime,
    /// End of the button phase, denormalized for range queries.
    pub ends_at: SystemTime,
    /// Config the session runs with.
    pub config_id: Uuid,
    /// Last persisted running score.
    pub current_score: u32,
    /// Frozen score, absent until the session ended.
    pub final_score: Option<u32>,
    /// Creator of the session.
    pub created_by: Uuid,
    /// User whose queue join started the session.
    pub started_by: Option<Uuid>,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
}

/// Registration of a user to a session. Unique per (session, user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationEntity {
    /// Session the user registered to.
    pub session_id: Uuid,
    /// Registered user.
    pub user_id: Uuid,
    /// Registration instant.
    pub registered_at: SystemTime,
}

/// Durable ledger entry for one accepted press. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ButtonPressEntity {
    /// Session the press belongs to.
    pub session_id: Uuid,
    /// User that pressed.
    pub user_id: Uuid,
    /// Server-side press instant.
    pub pressed_at: SystemTime,
}
