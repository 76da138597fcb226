use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;
use time::Duration;

use crate::{
    dao::storage::StorageError,
    state::{
        ledger::LedgerError,
        session::ConfigError,
        state_machine::{PressRejection, RegistrationError},
    },
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Request arrived outside the phase that allows it.
    #[error("not now: {0}")]
    PhaseViolation(String),
    /// The user must wait before pressing again.
    #[error("cooldown active, retry in {:.3}s", .retry_after.as_seconds_f64())]
    CooldownActive {
        /// Remaining cooldown.
        retry_after: Duration,
    },
    /// Request conflicts with existing data.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout
        )
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<PressRejection> for ServiceError {
    fn from(err: PressRejection) -> Self {
        match err {
            PressRejection::NotButtonPhase { .. } => ServiceError::PhaseViolation(err.to_string()),
            PressRejection::CooldownActive { retry_after } => {
                ServiceError::CooldownActive { retry_after }
            }
        }
    }
}

impl From<RegistrationError> for ServiceError {
    fn from(err: RegistrationError) -> Self {
        ServiceError::PhaseViolation(err.to_string())
    }
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        ServiceError::PhaseViolation(err.to_string())
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Rate limited; retry after the given number of seconds.
    #[error("too many requests: {message}")]
    TooManyRequests {
        /// Human readable reason.
        message: String,
        /// Whole seconds to wait, rounded up.
        retry_after_secs: u64,
    },
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::PhaseViolation(message) => AppError::Conflict(message),
            ServiceError::CooldownActive { retry_after } => AppError::TooManyRequests {
                message: err_message(retry_after),
                retry_after_secs: retry_after_secs(retry_after),
            },
            ServiceError::Conflict(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

fn err_message(retry_after: Duration) -> String {
    format!("cooldown active, retry in {:.3}s", retry_after.as_seconds_f64())
}

/// Round a remaining cooldown up to whole seconds for the `Retry-After` header.
pub(crate) fn retry_after_secs(retry_after: Duration) -> u64 {
    let millis = retry_after.whole_milliseconds().max(0);
    u64::try_from((millis + 999) / 1_000).unwrap_or(u64::MAX)
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retry_after = match &self {
            AppError::TooManyRequests {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        let mut response = (status, payload).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::phase_clock::Phase;

    #[test]
    fn cooldown_maps_to_429_with_retry_after() {
        let err: AppError = ServiceError::from(PressRejection::CooldownActive {
            retry_after: Duration::milliseconds(2_100),
        })
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "3");
    }

    #[test]
    fn phase_violation_maps_to_conflict() {
        let err: AppError = ServiceError::from(PressRejection::NotButtonPhase {
            phase: Phase::Countdown,
        })
        .into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn only_infrastructure_errors_are_retryable() {
        assert!(ServiceError::Timeout.is_retryable());
        assert!(ServiceError::Degraded.is_retryable());
        assert!(!ServiceError::NotFound("x".into()).is_retryable());
        assert!(
            !ServiceError::CooldownActive {
                retry_after: Duration::SECOND
            }
            .is_retryable()
        );
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::ZERO), 0);
        assert_eq!(retry_after_secs(Duration::milliseconds(1)), 1);
        assert_eq!(retry_after_secs(Duration::seconds(3)), 3);
    }
}
