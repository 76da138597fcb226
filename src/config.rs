//! Application-level configuration loading: scheduler timings, lifecycle
//! policies and the default session config.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::state::session::SessionConfig;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "DISCORDINATE_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Durations of the config used when a session does not name one.
pub struct DefaultSessionConfig {
    /// Countdown length in seconds.
    pub countdown_seconds: u32,
    /// Button phase length in seconds.
    pub button_press_seconds: u32,
    /// Per-user cooldown in seconds.
    pub button_press_timeout_seconds: u32,
    /// Scoring window in seconds.
    pub score_window_seconds: u32,
}

impl Default for DefaultSessionConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: 30,
            button_press_seconds: 60,
            button_press_timeout_seconds: 5,
            score_window_seconds: 5,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Period of the scheduler refresh tick.
    pub tick_interval: Duration,
    /// Maximum time a caller waits for a session scheduler to answer.
    pub request_timeout: Duration,
    /// Capacity of each scheduler command queue.
    pub command_capacity: usize,
    /// A community cannot have two sessions scheduled closer than this.
    pub creation_guard: Duration,
    /// Delay between a queue join that opens a session and its countdown.
    pub queue_lead: Duration,
    /// How long an ended session stays in memory before eviction.
    pub ended_retention: Duration,
    /// Buffer of the final score broadcast feed.
    pub final_score_capacity: usize,
    /// Maximum number of rows returned by the leaderboard feed.
    pub leaderboard_limit: usize,
    /// Durations of the default session config.
    pub default_session_config: DefaultSessionConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        tick_ms = app_config.tick_interval.as_millis() as u64,
                        "loaded application config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys take their default value.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Build the validated default session config.
    ///
    /// Invalid configured durations are replaced by the built-in ones.
    pub fn default_session_config(&self) -> SessionConfig {
        let DefaultSessionConfig {
            countdown_seconds,
            button_press_seconds,
            button_press_timeout_seconds,
            score_window_seconds,
        } = self.default_session_config;

        let config = SessionConfig::new(
            countdown_seconds,
            button_press_seconds,
            button_press_timeout_seconds,
            score_window_seconds,
        )
        .unwrap_or_else(|err| {
            warn!(error = %err, "invalid default session config; using built-in durations");
            let fallback = DefaultSessionConfig::default();
            SessionConfig {
                id: uuid::Uuid::new_v4(),
                countdown_seconds: fallback.countdown_seconds,
                button_press_seconds: fallback.button_press_seconds,
                button_press_timeout_seconds: fallback.button_press_timeout_seconds,
                score_window_seconds: fallback.score_window_seconds,
                is_default: true,
            }
        });

        SessionConfig {
            is_default: true,
            ..config
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    tick_interval_ms: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    request_timeout_ms: Duration,
    command_capacity: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    creation_guard_seconds: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    queue_lead_seconds: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    ended_retention_seconds: Duration,
    final_score_capacity: usize,
    leaderboard_limit: usize,
    default_session_config: RawSessionConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: Duration::from_secs(1),
            request_timeout_ms: Duration::from_secs(2),
            command_capacity: 64,
            creation_guard_seconds: Duration::from_secs(300),
            queue_lead_seconds: Duration::from_secs(60),
            ended_retention_seconds: Duration::from_secs(300),
            final_score_capacity: 64,
            leaderboard_limit: 50,
            default_session_config: RawSessionConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the default session durations.
struct RawSessionConfig {
    countdown_seconds: u32,
    button_press_seconds: u32,
    button_press_timeout_seconds: u32,
    score_window_seconds: u32,
}

impl Default for RawSessionConfig {
    fn default() -> Self {
        let defaults = DefaultSessionConfig::default();
        Self {
            countdown_seconds: defaults.countdown_seconds,
            button_press_seconds: defaults.button_press_seconds,
            button_press_timeout_seconds: defaults.button_press_timeout_seconds,
            score_window_seconds: defaults.score_window_seconds,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            // A zero period would make `tokio::time::interval` panic.
            tick_interval: value.tick_interval_ms.max(Duration::from_millis(10)),
            request_timeout: value.request_timeout_ms,
            command_capacity: value.command_capacity.max(1),
            creation_guard: value.creation_guard_seconds,
            queue_lead: value.queue_lead_seconds,
            ended_retention: value.ended_retention_seconds,
            final_score_capacity: value.final_score_capacity.max(1),
            leaderboard_limit: value.leaderboard_limit.max(1),
            default_session_config: DefaultSessionConfig {
                countdown_seconds: value.default_session_config.countdown_seconds,
                button_press_seconds: value.default_session_config.button_press_seconds,
                button_press_timeout_seconds: value
                    .default_session_config
                    .button_press_timeout_seconds,
                score_window_seconds: value.default_session_config.score_window_seconds,
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.creation_guard, Duration::from_secs(300));
        assert_eq!(
            config.default_session_config,
            DefaultSessionConfig::default()
        );
    }

    #[test]
    fn keys_override_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "tick_interval_ms": 250,
                "request_timeout_ms": 500,
                "queue_lead_seconds": 10,
                "default_session_config": { "countdown_seconds": 3, "score_window_seconds": 2 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_millis(500));
        assert_eq!(config.queue_lead, Duration::from_secs(10));
        assert_eq!(config.default_session_config.countdown_seconds, 3);
        assert_eq!(config.default_session_config.button_press_seconds, 60);
        assert_eq!(config.default_session_config.score_window_seconds, 2);
    }

    #[test]
    fn zero_tick_is_clamped() {
        let config = AppConfig::from_json(r#"{"tick_interval_ms": 0}"#).unwrap();
        assert!(config.tick_interval > Duration::ZERO);
    }

    #[test]
    fn invalid_default_session_config_falls_back() {
        let mut config = AppConfig::default();
        config.default_session_config.button_press_seconds = 0;
        let session_config = config.default_session_config();
        assert!(session_config.is_default);
        assert_eq!(session_config.button_press_seconds, 60);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(AppConfig::from_json("{ not json").is_err());
    }
}
