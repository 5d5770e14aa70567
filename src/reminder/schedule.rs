//! Reminder plans and recurrence arithmetic.
//!
//! A plan fires first at the task deadline. A recurring plan then fires at
//! `deadline + k * interval` for k = 1, 2, ... until cancelled. What happens
//! when the loop falls behind is governed by [`MissedTickPolicy`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::task::{Task, TaskId};

/// Catch-up behaviour for a recurring reminder that fell behind schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedTickPolicy {
    /// Drop missed ticks and continue at the first one not yet past.
    /// A tick due exactly now still fires, as with tokio's
    /// `MissedTickBehavior::Skip`.
    #[default]
    Skip,
    /// Fire every missed tick back-to-back
    Burst,
}

impl MissedTickPolicy {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "burst" => Some(Self::Burst),
            _ => None,
        }
    }

    /// Index of the next tick to fire after tick `fired` was delivered.
    ///
    /// `first_due` is the monotonic instant of tick 0.
    pub fn next_tick(
        &self,
        first_due: Instant,
        interval: Duration,
        fired: u64,
        now: Instant,
    ) -> u64 {
        let candidate = fired.saturating_add(1);
        match self {
            Self::Burst => candidate,
            Self::Skip => {
                let due = first_due + scale(interval, candidate);
                if due >= now {
                    return candidate;
                }
                let behind = now.duration_since(due).as_nanos();
                let missed = behind.div_ceil(interval.as_nanos().max(1));
                candidate.saturating_add(u64::try_from(missed).unwrap_or(u64::MAX))
            }
        }
    }
}

/// `interval * ticks`, saturating instead of overflowing.
pub(crate) fn scale(interval: Duration, ticks: u64) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(u128::from(ticks));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Wall-clock instant of tick `tick` for a plan starting at `deadline`.
pub(crate) fn wall_time(deadline: DateTime<Utc>, interval: Duration, tick: u64) -> DateTime<Utc> {
    chrono::Duration::from_std(scale(interval, tick))
        .ok()
        .and_then(|offset| deadline.checked_add_signed(offset))
        .unwrap_or(deadline)
}

/// What the scheduler needs to know about a task, and nothing more.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderRequest {
    pub task_id: TaskId,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub recurring: bool,
    pub recurrence_interval: Option<Duration>,
}

impl ReminderRequest {
    /// Snapshot the scheduling fields of a task. `None` when it has no deadline.
    pub fn from_task(task: &Task) -> Option<Self> {
        Some(Self {
            task_id: task.id,
            title: task.title.clone(),
            deadline: task.deadline?,
            recurring: task.recurring,
            recurrence_interval: task.recurrence_interval,
        })
    }

    /// Interval to repeat at, if this request actually recurs.
    ///
    /// A recurring flag without a positive interval yields `None`, i.e. a
    /// single one-shot reminder.
    pub fn effective_interval(&self) -> Option<Duration> {
        if !self.recurring {
            return None;
        }
        self.recurrence_interval.filter(|interval| !interval.is_zero())
    }

    /// Whether the recurring flag was set but cannot take effect.
    pub fn is_degraded(&self) -> bool {
        self.recurring && self.effective_interval().is_none()
    }
}
