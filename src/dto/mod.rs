use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod config;
pub mod health;
pub mod leaderboard;
pub mod phase;
pub mod press;
pub mod session;
pub mod sse;
pub mod validation;
pub mod ws;

fn format_time(time: OffsetDateTime) -> String {
    time.format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

fn format_system_time(time: SystemTime) -> String {
    format_time(OffsetDateTime::from(time))
}
