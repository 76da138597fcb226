use std::sync::Arc;

use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::dao::models::{
    ButtonPressEntity, RegistrationEntity, SessionConfigEntity, SessionEntity,
};

/// Upper bound accepted for any configured duration (one day).
const MAX_CONFIG_SECONDS: u32 = 86_400;

/// Phase durations and scoring parameters attached to a session.
///
/// A config is immutable once a session references it; sessions share it
/// through an [`Arc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Stable identifier of the config.
    pub id: Uuid,
    /// Length of the countdown that precedes the button phase.
    pub countdown_seconds: u32,
    /// Length of the window during which presses are accepted.
    pub button_press_seconds: u32,
    /// Minimum spacing between two accepted presses of the same user.
    pub button_press_timeout_seconds: u32,
    /// Width of the sliding window used to measure press clustering.
    pub score_window_seconds: u32,
    /// Whether this config is used when a session does not name one.
    pub is_default: bool,
}

/// Reasons a [`SessionConfig`] is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The button phase must last at least one second.
    #[error("button_press_seconds must be at least 1")]
    EmptyButtonPhase,
    /// The scoring window must last at least one second.
    #[error("score_window_seconds must be at least 1")]
    EmptyScoreWindow,
    /// A duration exceeds the supported maximum.
    #[error("{field} must not exceed {max} seconds (got {value})")]
    TooLong {
        /// Offending field name.
        field: &'static str,
        /// Supplied value.
        value: u32,
        /// Maximum accepted value.
        max: u32,
    },
}

impl SessionConfig {
    /// Build and validate a new config with a fresh identifier.
    pub fn new(
        countdown_seconds: u32,
        button_press_seconds: u32,
        button_press_timeout_seconds: u32,
        score_window_seconds: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            id: Uuid::new_v4(),
            countdown_seconds,
            button_press_seconds,
            button_press_timeout_seconds,
            score_window_seconds,
            is_default: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the structural constraints every config must satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.button_press_seconds == 0 {
            return Err(ConfigError::EmptyButtonPhase);
        }
        if self.score_window_seconds == 0 {
            return Err(ConfigError::EmptyScoreWindow);
        }

        for (field, value) in [
            ("countdown_seconds", self.countdown_seconds),
            ("button_press_seconds", self.button_press_seconds),
            (
                "button_press_timeout_seconds",
                self.button_press_timeout_seconds,
            ),
            ("score_window_seconds", self.score_window_seconds),
        ] {
            if value > MAX_CONFIG_SECONDS {
                return Err(ConfigError::TooLong {
                    field,
                    value,
                    max: MAX_CONFIG_SECONDS,
                });
            }
        }

        Ok(())
    }

    /// Countdown length as a duration.
    pub fn countdown(&self) -> Duration {
        Duration::seconds(i64::from(self.countdown_seconds))
    }

    /// Button phase length as a duration.
    pub fn button_phase(&self) -> Duration {
        Duration::seconds(i64::from(self.button_press_seconds))
    }

    /// Per-user cooldown as a duration.
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(i64::from(self.button_press_timeout_seconds))
    }

    /// Scoring window as a duration.
    pub fn score_window(&self) -> Duration {
        Duration::seconds(i64::from(self.score_window_seconds))
    }

    /// Time from `scheduled_at` until the session ends.
    pub fn total(&self) -> Duration {
        self.countdown() + self.button_phase()
    }
}

/// One scheduled instance of the game, tied to a community.
#[derive(Debug, Clone)]
pub struct Session {
    /// Primary key of the session.
    pub id: Uuid,
    /// Community the session belongs to.
    pub community_id: Uuid,
    /// Instant at which the countdown starts.
    pub scheduled_at: OffsetDateTime,
    /// Phase durations and scoring parameters.
    pub config: Arc<SessionConfig>,
    /// Running score, owned by the session scheduler.
    pub current_score: u32,
    /// Score frozen when the session ends.
    pub final_score: Option<u32>,
    /// User that created the session.
    pub created_by: Uuid,
    /// User whose queue join started the session, if any.
    pub started_by: Option<Uuid>,
    /// Creation timestamp for auditing.
    pub created_at: OffsetDateTime,
}

impl Session {
    /// Build a fresh session with no score yet.
    pub fn new(
        community_id: Uuid,
        scheduled_at: OffsetDateTime,
        config: Arc<SessionConfig>,
        created_by: Uuid,
        started_by: Option<Uuid>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            community_id,
            scheduled_at,
            config,
            current_score: 0,
            final_score: None,
            created_by,
            started_by,
            created_at,
        }
    }

    /// Instant at which the button phase closes and the session ends.
    pub fn ends_at(&self) -> OffsetDateTime {
        self.scheduled_at + self.config.total()
    }

    /// Whether the final score has been frozen.
    pub fn is_finalized(&self) -> bool {
        self.final_score.is_some()
    }
}

/// A single accepted button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPress {
    /// Session the press belongs to.
    pub session_id: Uuid,
    /// User that pressed.
    pub user_id: Uuid,
    /// Server-side instant of the press.
    pub pressed_at: OffsetDateTime,
}

/// A user's registration to an upcoming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Session the user registered to.
    pub session_id: Uuid,
    /// Registered user.
    pub user_id: Uuid,
    /// Registration instant.
    pub registered_at: OffsetDateTime,
}

impl From<SessionConfigEntity> for SessionConfig {
    fn from(value: SessionConfigEntity) -> Self {
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

impl From<&SessionConfig> for SessionConfigEntity {
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

impl From<(SessionEntity, Arc<SessionConfig>)> for Session {
    fn from((entity, config): (SessionEntity, Arc<SessionConfig>)) -> Self {
        Self {
            id: entity.id,
            community_id: entity.community_id,
            scheduled_at: entity.scheduled_at.into(),
            config,
            current_score: entity.current_score,
            final_score: entity.final_score,
            created_by: entity.created_by,
            started_by: entity.started_by,
            created_at: entity.created_at.into(),
        }
    }
}

impl From<&Session> for SessionEntity {
    fn from(value: &Session) -> Self {
        Self {
            id: value.id,
            community_id: value.community_id,
            scheduled_at: value.scheduled_at.into(),
            ends_at: value.ends_at().into(),
            config_id: value.config.id,
            current_score: value.current_score,
            final_score: value.final_score,
            created_by: value.created_by,
            started_by: value.started_by,
            created_at: value.created_at.into(),
        }
    }
}

impl From<ButtonPressEntity> for ButtonPress {
    fn from(value: ButtonPressEntity) -> Self {
        Self {
            session_id: value.session_id,
            user_id: value.user_id,
            pressed_at: value.pressed_at.into(),
        }
    }
}

impl From<&ButtonPress> for ButtonPressEntity {
    fn from(value: &ButtonPress) -> Self {
        Self {
            session_id: value.session_id,
            user_id: value.user_id,
            pressed_at: value.pressed_at.into(),
        }
    }
}

impl From<RegistrationEntity> for Registration {
    fn from(value: RegistrationEntity) -> Self {
        Self {
            session_id: value.session_id,
            user_id: value.user_id,
            registered_at: value.registered_at.into(),
        }
    }
}

impl From<&Registration> for RegistrationEntity {
    fn from(value: &Registration) -> Self {
        Self {
            session_id: value.session_id,
            user_id: value.user_id,
            registered_at: value.registered_at.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_empty_button_phase() {
        assert_eq!(
            SessionConfig::new(10, 0, 5, 10).unwrap_err(),
            ConfigError::EmptyButtonPhase
        );
    }

    #[test]
    fn config_rejects_empty_score_window() {
        assert_eq!(
            SessionConfig::new(10, 20, 5, 0).unwrap_err(),
            ConfigError::EmptyScoreWindow
        );
    }

    #[test]
    fn config_rejects_oversized_durations() {
        let err = SessionConfig::new(90_000, 20, 5, 10).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooLong {
                field: "countdown_seconds",
                ..
            }
        ));
    }

    #[test]
    fn zero_countdown_and_cooldown_are_allowed() {
        let config = SessionConfig::new(0, 20, 0, 10).unwrap();
        assert_eq!(config.total(), Duration::seconds(20));
        assert_eq!(config.cooldown(), Duration::ZERO);
    }

    #[test]
    fn session_end_is_scheduled_plus_both_phases() {
        let config = Arc::new(SessionConfig::new(10, 20, 5, 10).unwrap());
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let session = Session::new(Uuid::new_v4(), start, config, Uuid::new_v4(), None, start);
        assert_eq!(session.ends_at(), start + Duration::seconds(30));
        assert!(!session.is_finalized());
    }
}
