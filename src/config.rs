//! Configuration management for taskminder.
//!
//! Configuration can be set via environment variables:
//! - `TASKMINDER_MISSED_TICKS` - Optional. `skip` or `burst`: how a recurring reminder
//!   catches up after falling behind. Defaults to `skip`.
//! - `TASKMINDER_NOTIFY_TIMEOUT_SECS` - Optional. Upper bound for one notifier call.
//!   Defaults to `30`.
//! - `TASKMINDER_CLOCK` - Optional. `system` reads the wall clock on every schedule;
//!   `monotonic` reads it once and then advances with the monotonic clock, ignoring
//!   later system clock adjustments. Defaults to `system`.
//! - `TASKMINDER_DEMO_SECS` - Optional. How long the demo binary runs before shutting
//!   down. Unset means until Ctrl-C.

use std::time::Duration;
use thiserror::Error;

use crate::reminder::{ClockKind, MissedTickPolicy, DEFAULT_NOTIFY_TIMEOUT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Catch-up policy for recurring reminders
    pub missed_ticks: MissedTickPolicy,

    /// Upper bound for a single notifier call
    pub notify_timeout: Duration,

    /// Clock used to turn deadlines into delays
    pub clock: ClockKind,

    /// Demo driver run time (`None` runs until interrupted)
    pub demo_duration: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            missed_ticks: MissedTickPolicy::default(),
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            clock: ClockKind::default(),
            demo_duration: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source (useful for testing).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("TASKMINDER_MISSED_TICKS") {
            config.missed_ticks = MissedTickPolicy::parse(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "TASKMINDER_MISSED_TICKS".to_string(),
                    format!("expected 'skip' or 'burst', got '{}'", value),
                )
            })?;
        }

        if let Some(value) = lookup("TASKMINDER_NOTIFY_TIMEOUT_SECS") {
            let secs = parse_positive_secs("TASKMINDER_NOTIFY_TIMEOUT_SECS", &value)?;
            config.notify_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup("TASKMINDER_CLOCK") {
            config.clock = ClockKind::parse(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "TASKMINDER_CLOCK".to_string(),
                    format!("expected 'system' or 'monotonic', got '{}'", value),
                )
            })?;
        }

        if let Some(value) = lookup("TASKMINDER_DEMO_SECS") {
            let secs = parse_positive_secs("TASKMINDER_DEMO_SECS", &value)?;
            config.demo_duration = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn parse_positive_secs(name: &str, value: &str) -> Result<u64, ConfigError> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(secs)
}
