//! Wall-clock sources used to turn deadlines into timer delays.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Source of "now" for deadline arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time derived from the monotonic clock.
///
/// Reads the system clock once at construction and advances with
/// `tokio::time::Instant` afterwards, so system clock adjustments do not
/// shift deadlines. Follows tokio's paused clock in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.anchor.elapsed())
            .ok()
            .and_then(|elapsed| self.anchor_wall.checked_add_signed(elapsed))
            .unwrap_or(self.anchor_wall)
    }
}

/// Clock selection for configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    #[default]
    System,
    Monotonic,
}

impl ClockKind {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "system" => Some(Self::System),
            "monotonic" => Some(Self::Monotonic),
            _ => None,
        }
    }

    pub fn build(&self) -> Arc<dyn Clock> {
        match self {
            Self::System => Arc::new(SystemClock),
            Self::Monotonic => Arc::new(MonotonicClock::new()),
        }
    }
}
