//! Task registry: the id -> task table plus its reminder scheduler.
//!
//! Every mutating operation runs on the caller's thread under one table
//! lock, and reschedules the task's reminder before the lock is released.
//! A firing therefore never observes a half-applied edit, and the task
//! table and the handle table stay consistent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Config;
use crate::reminder::{Notifier, ReminderRequest, ReminderScheduler, Result, TimerSettings};
use crate::task::{NewTask, Task, TaskId, TaskPatch};

#[derive(Default)]
struct TaskTable {
    /// Last id handed out; never decremented
    last_id: u64,
    tasks: HashMap<TaskId, Task>,
}

/// Caller-owned, in-memory task registry with deadline reminders.
///
/// Dropping the store cancels all pending reminders.
#[derive(Debug)]
pub struct TaskStore {
    table: Mutex<TaskTable>,
    scheduler: ReminderScheduler,
}

impl std::fmt::Debug for TaskTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTable")
            .field("last_id", &self.last_id)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl TaskStore {
    /// Create a store whose reminders run on the current tokio runtime.
    pub fn new(notifier: Arc<dyn Notifier>, settings: TimerSettings) -> Result<Self> {
        Ok(Self::with_scheduler(ReminderScheduler::new(notifier, settings)?))
    }

    /// Create a store using the timer settings and clock from `config`.
    pub fn from_config(notifier: Arc<dyn Notifier>, config: &Config) -> Result<Self> {
        let scheduler = ReminderScheduler::new(notifier, TimerSettings::from(config))?
            .with_clock(config.clock.build());
        Ok(Self::with_scheduler(scheduler))
    }

    pub fn with_scheduler(scheduler: ReminderScheduler) -> Self {
        Self {
            table: Mutex::new(TaskTable::default()),
            scheduler,
        }
    }

    /// Current time on the clock reminders are scheduled against.
    pub fn now(&self) -> DateTime<Utc> {
        self.scheduler.now()
    }

    fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a new task under a fresh id and schedule its reminder.
    pub fn add_task(&self, request: NewTask) -> Task {
        let mut table = self.lock();
        table.last_id += 1;
        let task = Task::from_request(TaskId::new(table.last_id), request);
        table.tasks.insert(task.id, task.clone());
        let reminder = self.reschedule(&task);

        info!(
            task_id = %task.id,
            priority = %task.priority,
            reminder,
            "Task added: {}",
            task.title
        );
        task
    }

    /// Apply `patch` to task `id` and reinstall its reminder.
    ///
    /// The reminder is reinstalled even when the patch touches no
    /// scheduling field. Returns `false` if the task does not exist, in
    /// which case nothing is changed.
    pub fn edit_task(&self, id: TaskId, patch: TaskPatch) -> bool {
        let mut table = self.lock();
        let Some(task) = table.tasks.get_mut(&id) else {
            debug!(task_id = %id, "Edit for unknown task");
            return false;
        };
        task.apply(patch);
        let task = task.clone();
        let reminder = self.reschedule(&task);

        info!(task_id = %id, reminder, "Task edited");
        true
    }

    /// Cancel the reminder for `id` and remove the task.
    ///
    /// Returns whether a task was removed; deleting an unknown id is a no-op.
    pub fn delete_task(&self, id: TaskId) -> bool {
        let mut table = self.lock();
        self.scheduler.cancel(id);
        let removed = table.tasks.remove(&id).is_some();
        if removed {
            info!(task_id = %id, "Task deleted");
        }
        removed
    }

    /// Snapshot of all tasks, in ascending id order.
    ///
    /// Callers should not rely on the order.
    pub fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.lock().tasks.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether task `id` currently has a pending reminder.
    pub fn has_reminder(&self, id: TaskId) -> bool {
        self.scheduler.has_reminder(id)
    }

    /// Cancel all pending reminders. Tasks stay in the store.
    pub fn shutdown(&self) {
        let _table = self.lock();
        self.scheduler.shutdown();
    }

    /// Cancel-and-replace the reminder for `task`. Caller holds the table lock.
    fn reschedule(&self, task: &Task) -> bool {
        match ReminderRequest::from_task(task) {
            Some(request) => self.scheduler.schedule(request),
            None => {
                self.scheduler.cancel(task.id);
                false
            }
        }
    }
}
