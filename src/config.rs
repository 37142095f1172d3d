//! Application-level configuration loading: race timing, score table, dedupe window and
//! session expiry.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    services::submission_gate::DEFAULT_DEDUPE_WINDOW,
    state::{
        race_timer::{RaceConfig, RaceConfigError},
        scoring::{ScoreTable, ScoreTableError, ScoreTier},
    },
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "START_LIGHTS_CONFIG_PATH";
/// Race sessions untouched for this long are closed.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    race: RaceConfig,
    dedupe_window: Duration,
    session_idle_ttl: Duration,
}

/// Reasons the configuration file content is rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Not valid JSON or wrong shape.
    #[error("invalid configuration document")]
    Parse(#[from] serde_json::Error),
    /// Score table rejected.
    #[error("invalid score table")]
    ScoreTable(#[from] ScoreTableError),
    /// Race timing rejected.
    #[error("invalid race settings")]
    Race(#[from] RaceConfigError),
    /// A duration that must be positive was set to zero.
    #[error("`{field}` must be greater than zero")]
    ZeroDuration {
        /// Offending setting.
        field: &'static str,
    },
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
                        lights = app_config.race.light_count(),
                        tiers = app_config.race.score_table().tiers().len(),
                        "loaded race configuration"
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

    /// Parse and validate a configuration document. Missing sections keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        Self::try_from(raw)
    }

    /// Race timing and score table.
    pub fn race(&self) -> &RaceConfig {
        &self.race
    }

    /// How long a submitted result is remembered by the dedupe gate.
    pub fn dedupe_window(&self) -> Duration {
        self.dedupe_window
    }

    /// Idle time after which a race session is closed.
    pub fn session_idle_ttl(&self) -> Duration {
        self.session_idle_ttl
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            race: RaceConfig::default(),
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            session_idle_ttl: DEFAULT_SESSION_IDLE_TTL,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    race: RawRace,
    score_table: Option<RawScoreTable>,
    submission: RawSubmission,
    sessions: RawSessions,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRace {
    light_count: u8,
    light_interval_ms: u64,
    min_random_delay_ms: u64,
    max_random_delay_ms: u64,
}

impl Default for RawRace {
    fn default() -> Self {
        let race = RaceConfig::default();
        Self {
            light_count: race.light_count(),
            light_interval_ms: race.light_interval().as_millis() as u64,
            min_random_delay_ms: race.min_random_delay().as_millis() as u64,
            max_random_delay_ms: race.max_random_delay().as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawScoreTable {
    tiers: Vec<ScoreTier>,
    floor_points: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSubmission {
    dedupe_window_ms: u64,
}

impl Default for RawSubmission {
    fn default() -> Self {
        Self {
            dedupe_window_ms: DEFAULT_DEDUPE_WINDOW.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSessions {
    idle_ttl_ms: u64,
}

impl Default for RawSessions {
    fn default() -> Self {
        Self {
            idle_ttl_ms: DEFAULT_SESSION_IDLE_TTL.as_millis() as u64,
        }
    }
}

fn positive_millis(value: u64, field: &'static str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroDuration { field });
    }
    Ok(Duration::from_millis(value))
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        let score_table = match value.score_table {
            Some(raw) => ScoreTable::new(raw.tiers, raw.floor_points)?,
            None => ScoreTable::default(),
        };
        let race = RaceConfig::new(
            value.race.light_count,
            Duration::from_millis(value.race.light_interval_ms),
            Duration::from_millis(value.race.min_random_delay_ms),
            Duration::from_millis(value.race.max_random_delay_ms),
            score_table,
        )?;

        Ok(Self {
            race,
            dedupe_window: positive_millis(
                value.submission.dedupe_window_ms,
                "submission.dedupe_window_ms",
            )?,
            session_idle_ttl: positive_millis(value.sessions.idle_ttl_ms, "sessions.idle_ttl_ms")?,
        })
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
    fn empty_document_keeps_defaults() {
        assert_eq!(AppConfig::from_json("{}").unwrap(), AppConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "race": { "light_count": 3, "light_interval_ms": 800 },
                "score_table": {
                    "tiers": [{ "below_ms": 200, "points": 500 }, { "below_ms": 400, "points": 250 }],
                    "floor_points": 50
                },
                "submission": { "dedupe_window_ms": 5000 },
                "sessions": { "idle_ttl_ms": 60000 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.race().light_count(), 3);
        assert_eq!(config.race().light_interval(), Duration::from_millis(800));
        assert_eq!(config.race().min_random_delay(), Duration::from_millis(200));
        assert_eq!(config.race().score_table().score_of(150), 500);
        assert_eq!(config.race().score_table().score_of(10_000), 50);
        assert_eq!(config.dedupe_window(), Duration::from_secs(5));
        assert_eq!(config.session_idle_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            AppConfig::from_json(r#"{ "race": { "light_count": 0 } }"#),
            Err(ConfigError::Race(RaceConfigError::NoLights))
        ));
        assert!(matches!(
            AppConfig::from_json(r#"{ "score_table": { "tiers": [], "floor_points": 10 } }"#),
            Err(ConfigError::ScoreTable(_))
        ));
        assert!(matches!(
            AppConfig::from_json(r#"{ "submission": { "dedupe_window_ms": 0 } }"#),
            Err(ConfigError::ZeroDuration {
                field: "submission.dedupe_window_ms"
            })
        ));
        assert!(matches!(
            AppConfig::from_json(r#"{ "sessions": { "idle_ttl_ms": 0 } }"#),
            Err(ConfigError::ZeroDuration {
                field: "sessions.idle_ttl_ms"
            })
        ));
        assert!(matches!(
            AppConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
