//! Validation helpers for DTOs.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use validator::ValidationError;

/// Parse an RFC 3339 timestamp such as `2024-05-01T18:00:00Z`.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, ValidationError> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).map_err(|err| {
        let mut error = ValidationError::new("timestamp_format");
        error.message = Some(format!("expected an RFC 3339 timestamp ({err})").into());
        error
    })
}

/// Validates that `value` is an RFC 3339 timestamp.
///
/// # Examples
///
/// ```ignore
/// validate_timestamp("2024-05-01T18:00:00Z")      // Ok
/// validate_timestamp("2024-05-01T18:00:00+02:00") // Ok
/// validate_timestamp("2024-05-01 18:00")          // Err - not RFC 3339
/// ```
pub fn validate_timestamp(value: &str) -> Result<(), ValidationError> {
    parse_timestamp(value).map(|_| ())
}
