use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::format_time, error::retry_after_secs, error::ServiceError,
    state::scheduler::PressAccepted,
};

/// Button press submitted by a client.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct PressRequest {
    #[validate(required)]
    pub session_id: Option<Uuid>,
    #[validate(required)]
    pub user_id: Option<Uuid>,
}

/// Why a press was not recorded.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PressRejectionReason {
    /// The session is not in its button phase.
    NotButtonPhase,
    /// The user pressed too recently.
    CooldownActive,
    /// The session does not exist.
    UnknownSession,
    /// The request was malformed.
    Invalid,
    /// Storage is unreachable; the press may be retried.
    Unavailable,
}

/// Result of a press, accepted or not.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct PressResponse {
    pub accepted: bool,
    pub session_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    /// Score after the press, when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_score: Option<u32>,
    /// Server-side press instant, when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<PressRejectionReason>,
    /// Whole seconds to wait before the next press is allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl From<PressAccepted> for PressResponse {
    fn from(value: PressAccepted) -> Self {
        Self {
            accepted: true,
            session_id: Some(value.session_id),
            user_id: Some(value.user_id),
            current_score: Some(value.current_score),
            pressed_at: Some(format_time(value.pressed_at)),
            reason: None,
            retry_after_seconds: None,
        }
    }
}

impl PressResponse {
    /// Feedback for a rejected press.
    pub fn rejected(session_id: Option<Uuid>, user_id: Option<Uuid>, err: &ServiceError) -> Self {
        let (reason, retry_after_seconds) = match err {
            ServiceError::PhaseViolation(_) => (PressRejectionReason::NotButtonPhase, None),
            ServiceError::CooldownActive { retry_after } => (
                PressRejectionReason::CooldownActive,
                Some(retry_after_secs(*retry_after)),
            ),
            ServiceError::NotFound(_) => (PressRejectionReason::UnknownSession, None),
            ServiceError::InvalidInput(_) | ServiceError::Conflict(_) => {
                (PressRejectionReason::Invalid, None)
            }
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout => {
                (PressRejectionReason::Unavailable, None)
            }
        };
        Self {
            accepted: false,
            session_id,
            user_id,
            current_score: None,
            pressed_at: None,
            reason: Some(reason),
            retry_after_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    #[test]
    fn missing_ids_fail_validation() {
        let request = PressRequest {
            session_id: None,
            user_id: Some(Uuid::new_v4()),
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("session_id"));
    }

    #[test]
    fn cooldown_rejection_carries_retry_after() {
        let response = PressResponse::rejected(
            Some(Uuid::nil()),
            Some(Uuid::nil()),
            &ServiceError::CooldownActive {
                retry_after: Duration::milliseconds(1_500),
            },
        );
        assert!(!response.accepted);
        assert_eq!(response.reason, Some(PressRejectionReason::CooldownActive));
        assert_eq!(response.retry_after_seconds, Some(2));
    }
}
