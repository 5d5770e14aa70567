//! # taskminder
//!
//! In-process task registry with deadline reminders.
//!
//! This library provides:
//! - A caller-owned `TaskStore` for creating, editing, listing and deleting tasks
//! - A `ReminderScheduler` that keeps at most one reminder timer per task
//! - A `Notifier` seam through which reminder firings are delivered
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │            TaskStore             │
//!        │   (id -> Task, id assignment)    │
//!        └────────────────┬─────────────────┘
//!                         │ cancel / install per task id
//!                         ▼
//!               ┌───────────────────┐
//!               │ ReminderScheduler │
//!               │  (tokio timers)   │
//!               └─────────┬─────────┘
//!                         │ Reminder
//!                         ▼
//!                ┌─────────────────┐
//!                │    Notifier     │
//!                └─────────────────┘
//! ```
//!
//! ## Reminder Flow
//! 1. A task is added or edited with a future deadline
//! 2. Any existing timer for the task is aborted, a new one installed
//! 3. At the deadline the notifier is called, then every interval if recurring
//! 4. Deleting the task (or dropping the store) cancels the timer
//!
//! ## Modules
//! - `task`: Task record and create/update requests
//! - `reminder`: Scheduler, notifiers, clocks and recurrence policy
//! - `store`: The task registry tying both together

pub mod config;
pub mod reminder;
pub mod store;
pub mod task;

pub use config::Config;
pub use reminder::{Notifier, Reminder, ReminderScheduler};
pub use store::TaskStore;
pub use task::{NewTask, Priority, Task, TaskId, TaskPatch};
