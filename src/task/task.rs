//! Core Task record plus the creation and partial-update requests.
//!
//! # Invariants
//! - `id` is unique within a `TaskStore` and never reused
//! - `recurrence_interval` only matters when `recurring` is set

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
///
/// # Properties
/// - Assigned by the store, starting at 1
/// - Strictly increasing within one store, never reused after delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(TaskError::UnknownPriority(other.to_string())),
        }
    }
}

/// A user-defined work item with an optional deadline and recurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Absolute instant at which the first reminder fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurring: bool,
    /// Spacing between reminders after the deadline (only read when `recurring`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_interval: Option<Duration>,
}

impl Task {
    /// Build a stored task from a creation request.
    pub(crate) fn from_request(id: TaskId, request: NewTask) -> Self {
        Self {
            id,
            title: request.title,
            description: request.description,
            priority: request.priority,
            deadline: request.deadline,
            recurring: request.recurring,
            recurrence_interval: request.recurrence_interval,
        }
    }

    /// Apply only the fields present in `patch`.
    ///
    /// # Postcondition
    /// Fields the patch leaves as `None` are unchanged.
    pub fn apply(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(deadline) = patch.deadline {
            self.deadline = deadline;
        }
        if let Some(recurring) = patch.recurring {
            self.recurring = recurring;
        }
        if let Some(interval) = patch.recurrence_interval {
            self.recurrence_interval = interval;
        }
    }
}

/// Request to create a task.
///
/// Defaults: medium priority, no description, no deadline, not recurring.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub deadline: Option<DateTime<Utc>>,
    pub recurring: bool,
    pub recurrence_interval: Option<Duration>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Mark the task recurring every `interval` after its deadline.
    pub fn recurring_every(mut self, interval: Duration) -> Self {
        self.recurring = true;
        self.recurrence_interval = Some(interval);
        self
    }

    /// Set the recurrence flag without an interval.
    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }
}

/// Partial update for an existing task.
///
/// `None` leaves a field untouched. Nullable fields take `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub recurring: Option<bool>,
    pub recurrence_interval: Option<Option<Duration>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = Some(recurring);
        self
    }

    pub fn recurrence_interval(mut self, interval: Option<Duration>) -> Self {
        self.recurrence_interval = Some(interval);
        self
    }

    /// Whether the patch supplies no fields at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Errors that can occur while parsing task fields.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Unknown priority: {0}")]
    UnknownPriority(String),
}
