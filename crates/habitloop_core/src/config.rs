//! TOML engine configuration.
//!
//! # Responsibility
//! - Load calendar, sweep, logging and database settings.
//! - Reject out-of-range values before any engine code sees them.
//!
//! # Invariants
//! - Every key has a default; an empty document is a valid config.
//! - A validated config always yields a well-formed `Calendar`.

use crate::model::recurrence::{Calendar, WeekStart};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest accepted distance from UTC, in minutes.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;
pub const DEFAULT_SWEEP_BATCH_SIZE: u32 = 500;
pub const MAX_SWEEP_BATCH_SIZE: u32 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for `{key}`: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Day-boundary settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Minutes east of UTC; `0` anchors days at UTC midnight.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub week_start: WeekStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Periods fetched per sweep batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Absolute directory for rolling log files. File logging is off when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_batch_size() -> u32 {
    DEFAULT_SWEEP_BATCH_SIZE
}

fn default_log_level() -> String {
    crate::logging::default_log_level().to_string()
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            week_start: WeekStart::Monday,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

impl EngineConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let offset = self.calendar.utc_offset_minutes;
        if !(-MAX_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&offset) {
            return Err(ConfigError::InvalidValue {
                key: "calendar.utc_offset_minutes",
                message: format!(
                    "{offset} is outside -{MAX_UTC_OFFSET_MINUTES}..={MAX_UTC_OFFSET_MINUTES}"
                ),
            });
        }

        let batch_size = self.sweep.batch_size;
        if !(1..=MAX_SWEEP_BATCH_SIZE).contains(&batch_size) {
            return Err(ConfigError::InvalidValue {
                key: "sweep.batch_size",
                message: format!("{batch_size} is outside 1..={MAX_SWEEP_BATCH_SIZE}"),
            });
        }

        if let Some(dir) = &self.logging.dir {
            if !dir.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    key: "logging.dir",
                    message: format!("`{}` must be an absolute path", dir.display()),
                });
            }
        }

        Ok(())
    }

    /// Day-boundary rule used by every date computation.
    pub fn calendar(&self) -> Calendar {
        Calendar::with_offset_minutes(
            self.calendar.utc_offset_minutes,
            self.calendar.week_start,
        )
    }
}
