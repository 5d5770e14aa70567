//! Reminder scheduler: at most one cancellable timer per task.
//!
//! Each installed handle is a spawned tokio task sleeping on the monotonic
//! clock. The wall-clock deadline is turned into a delay once, when the
//! handle is installed. Install and cancel both happen under the handle
//! table lock, so a replacement is only inserted after the previous handle
//! for the same task has been aborted and removed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::error::Result;
use super::notifier::{Notifier, Reminder};
use super::schedule::{scale, wall_time, MissedTickPolicy, ReminderRequest};
use crate::config::Config;
use crate::task::TaskId;

/// Default upper bound for a single notifier call.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing knobs shared by every handle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub missed_ticks: MissedTickPolicy,
    pub notify_timeout: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            missed_ticks: MissedTickPolicy::default(),
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }
}

impl From<&Config> for TimerSettings {
    fn from(config: &Config) -> Self {
        Self {
            missed_ticks: config.missed_ticks,
            notify_timeout: config.notify_timeout,
        }
    }
}

struct ActiveHandle {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct HandleTable {
    next_generation: u64,
    active: HashMap<TaskId, ActiveHandle>,
}

fn lock(table: &Mutex<HandleTable>) -> MutexGuard<'_, HandleTable> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns the reminder handles for one task registry.
///
/// Dropping the scheduler cancels every pending reminder.
pub struct ReminderScheduler {
    runtime: Handle,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    settings: TimerSettings,
    handles: Arc<Mutex<HandleTable>>,
}

impl ReminderScheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// # Errors
    /// Returns `ReminderError::NoRuntime` when called outside a runtime.
    pub fn new(notifier: Arc<dyn Notifier>, settings: TimerSettings) -> Result<Self> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_runtime(runtime, notifier, settings))
    }

    /// Create a scheduler that spawns its timers on `runtime`.
    pub fn with_runtime(
        runtime: Handle,
        notifier: Arc<dyn Notifier>,
        settings: TimerSettings,
    ) -> Self {
        Self {
            runtime,
            clock: Arc::new(SystemClock),
            notifier,
            settings,
            handles: Arc::new(Mutex::new(HandleTable::default())),
        }
    }

    /// Use `clock` instead of the system clock for deadline arithmetic.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> TimerSettings {
        self.settings
    }

    /// Current time according to this scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Replace the reminder for `request.task_id`.
    ///
    /// Any existing handle for the task is cancelled first. Returns `true`
    /// when a new handle was installed, `false` when the deadline is not in
    /// the future (the reminder is skipped, never fired retroactively).
    pub fn schedule(&self, request: ReminderRequest) -> bool {
        let mut table = lock(&self.handles);
        cancel_locked(&mut table, request.task_id);

        let delay = match (request.deadline - self.clock.now()).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                debug!(
                    task_id = %request.task_id,
                    deadline = %request.deadline,
                    "Deadline already passed, no reminder scheduled"
                );
                return false;
            }
        };

        if request.is_degraded() {
            warn!(
                task_id = %request.task_id,
                "Recurring task has no usable interval, scheduling a single reminder"
            );
        }

        table.next_generation += 1;
        let generation = table.next_generation;
        let interval = request.effective_interval();
        let timer = HandleTimer {
            task_id: request.task_id,
            title: request.title,
            deadline: request.deadline,
            interval,
            first_due: Instant::now() + delay,
            generation,
            notifier: self.notifier.clone(),
            settings: self.settings,
            handles: Arc::downgrade(&self.handles),
        };

        debug!(
            task_id = %timer.task_id,
            generation,
            delay_ms = delay.as_millis() as u64,
            interval_ms = timer.interval.map(|i| i.as_millis() as u64),
            "Installing reminder"
        );

        let task_id = timer.task_id;
        let task = self.runtime.spawn(timer.run());
        table.active.insert(task_id, ActiveHandle { generation, task });
        true
    }

    /// Stop future firings for `task_id`. Returns whether a handle existed.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let mut table = lock(&self.handles);
        cancel_locked(&mut table, task_id)
    }

    /// Whether a reminder is currently pending for `task_id`.
    pub fn has_reminder(&self, task_id: TaskId) -> bool {
        lock(&self.handles).active.contains_key(&task_id)
    }

    /// Ids with a pending reminder, ascending.
    pub fn pending(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = lock(&self.handles).active.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Cancel every pending reminder.
    pub fn shutdown(&self) {
        let mut table = lock(&self.handles);
        let cancelled = table.active.len();
        for (_, handle) in table.active.drain() {
            handle.task.abort();
        }
        if cancelled > 0 {
            debug!(cancelled, "Reminder scheduler shut down");
        }
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ReminderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderScheduler")
            .field("settings", &self.settings)
            .field("pending", &self.pending())
            .finish()
    }
}

fn cancel_locked(table: &mut HandleTable, task_id: TaskId) -> bool {
    match table.active.remove(&task_id) {
        Some(handle) => {
            handle.task.abort();
            debug!(task_id = %task_id, generation = handle.generation, "Reminder cancelled");
            true
        }
        None => false,
    }
}

/// State owned by one spawned reminder task.
struct HandleTimer {
    task_id: TaskId,
    title: String,
    deadline: DateTime<Utc>,
    interval: Option<Duration>,
    first_due: Instant,
    generation: u64,
    notifier: Arc<dyn Notifier>,
    settings: TimerSettings,
    handles: Weak<Mutex<HandleTable>>,
}

impl HandleTimer {
    async fn run(self) {
        let mut tick = 0u64;
        let mut occurrence = 0u64;

        loop {
            let offset = self.interval.map(|i| scale(i, tick)).unwrap_or_default();
            tokio::time::sleep_until(self.first_due + offset).await;

            occurrence += 1;
            self.deliver(tick, occurrence).await;

            let Some(interval) = self.interval else {
                break;
            };
            let next = self
                .settings
                .missed_ticks
                .next_tick(self.first_due, interval, tick, Instant::now());
            if next > tick + 1 {
                debug!(
                    task_id = %self.task_id,
                    skipped = next - tick - 1,
                    "Skipping missed reminder ticks"
                );
            }
            tick = next;
        }

        self.release();
    }

    async fn deliver(&self, tick: u64, occurrence: u64) {
        let reminder = Reminder {
            task_id: self.task_id,
            title: self.title.clone(),
            fired_at: wall_time(self.deadline, self.interval.unwrap_or_default(), tick),
            recurring: self.interval.is_some(),
            occurrence,
        };

        let delivery = AssertUnwindSafe(self.notifier.notify(&reminder)).catch_unwind();
        match tokio::time::timeout(self.settings.notify_timeout, delivery).await {
            Ok(Ok(Ok(()))) => {
                debug!(task_id = %self.task_id, occurrence, "Reminder delivered");
            }
            Ok(Ok(Err(e))) => {
                warn!(
                    task_id = %self.task_id,
                    occurrence,
                    error = %e,
                    "Reminder notification failed"
                );
            }
            Ok(Err(panic)) => {
                warn!(
                    task_id = %self.task_id,
                    occurrence,
                    panic = panic_message(panic.as_ref()),
                    "Reminder notifier panicked"
                );
            }
            Err(_) => {
                warn!(
                    task_id = %self.task_id,
                    occurrence,
                    timeout_ms = self.settings.notify_timeout.as_millis() as u64,
                    "Reminder notification timed out"
                );
            }
        }
    }

    /// Drop this handle's table entry once a one-shot reminder has fired.
    fn release(&self) {
        let Some(handles) = self.handles.upgrade() else {
            return;
        };
        let mut table = lock(&handles);
        let owned = table
            .active
            .get(&self.task_id)
            .is_some_and(|h| h.generation == self.generation);
        if owned {
            table.active.remove(&self.task_id);
            debug!(task_id = %self.task_id, "One-shot reminder released");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::{ChannelNotifier, MonotonicClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn request(
        scheduler: &ReminderScheduler,
        id: u64,
        in_secs: i64,
        interval: Option<Duration>,
    ) -> ReminderRequest {
        ReminderRequest {
            task_id: TaskId::new(id),
            title: format!("task {}", id),
            deadline: scheduler.now() + chrono::Duration::seconds(in_secs),
            recurring: interval.is_some(),
            recurrence_interval: interval,
        }
    }

    fn scheduler_with(
        notifier: impl Notifier + 'static,
        settings: TimerSettings,
    ) -> ReminderScheduler {
        ReminderScheduler::new(Arc::new(notifier), settings)
            .expect("runtime")
            .with_clock(Arc::new(MonotonicClock::new()))
    }

    fn channel_scheduler(
        settings: TimerSettings,
    ) -> (ReminderScheduler, UnboundedReceiver<Reminder>) {
        let (notifier, rx) = ChannelNotifier::channel();
        (scheduler_with(notifier, settings), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Reminder>) -> Vec<Reminder> {
        let mut out = Vec::new();
        while let Ok(reminder) = rx.try_recv() {
            out.push(reminder);
        }
        out
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    struct FailingNotifier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _reminder: &Reminder) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("mail server unreachable")
        }
    }

    struct PanickingNotifier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Notifier for PanickingNotifier {
        async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("notifier blew up on task {}", reminder.task_id);
        }
    }

    struct HangingNotifier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Notifier for HangingNotifier {
        async fn notify(&self, _reminder: &Reminder) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    /// Records each reminder, then takes `delay` to "deliver" it.
    struct SlowNotifier {
        delay: Duration,
        seen: Arc<Mutex<Vec<Reminder>>>,
    }

    #[async_trait::async_trait]
    impl Notifier for SlowNotifier {
        async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(reminder.clone());
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[test]
    fn new_outside_runtime_fails() {
        let (notifier, _rx) = ChannelNotifier::channel();
        let result = ReminderScheduler::new(Arc::new(notifier), TimerSettings::default());
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_exactly_once() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        assert!(scheduler.schedule(request(&scheduler, 1, 10, None)));
        assert!(scheduler.has_reminder(TaskId::new(1)));

        advance(9).await;
        assert!(drain(&mut rx).is_empty());

        advance(2).await;
        let fired = drain(&mut rx);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].task_id, TaskId::new(1));
        assert_eq!(fired[0].occurrence, 1);
        assert!(!fired[0].recurring);

        advance(120).await;
        assert!(drain(&mut rx).is_empty());
        // fired one-shot handles are removed from the table
        assert!(!scheduler.has_reminder(TaskId::new(1)));
        assert!(!scheduler.cancel(TaskId::new(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_fires_at_deadline_then_every_interval() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        let req = request(&scheduler, 2, 5, Some(Duration::from_secs(15)));
        let deadline = req.deadline;
        scheduler.schedule(req);

        advance(6).await;
        assert_eq!(drain(&mut rx).len(), 1);
        advance(15).await;
        assert_eq!(drain(&mut rx).len(), 1);
        advance(15).await;
        let third = drain(&mut rx);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].occurrence, 3);
        assert!(third[0].recurring);
        assert_eq!(third[0].fired_at - deadline, chrono::Duration::seconds(30));

        assert!(scheduler.cancel(TaskId::new(2)));
        advance(100).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_is_skipped() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        assert!(!scheduler.schedule(request(&scheduler, 3, -5, None)));
        assert!(!scheduler.schedule(request(&scheduler, 4, 0, Some(Duration::from_secs(1)))));
        assert!(scheduler.pending().is_empty());

        advance(60).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_existing_handle() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        scheduler.schedule(request(&scheduler, 5, 10, None));
        scheduler.schedule(request(&scheduler, 5, 20, None));
        assert_eq!(scheduler.pending(), vec![TaskId::new(5)]);

        advance(15).await;
        assert!(drain(&mut rx).is_empty());
        advance(6).await;
        assert_eq!(drain(&mut rx).len(), 1);
        advance(60).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_to_past_deadline_cancels_old_handle() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        scheduler.schedule(request(&scheduler, 6, 10, None));
        assert!(!scheduler.schedule(request(&scheduler, 6, -1, None)));
        assert!(!scheduler.has_reminder(TaskId::new(6)));

        advance(30).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_without_interval_fires_once() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        let mut req = request(&scheduler, 7, 5, None);
        req.recurring = true;
        scheduler.schedule(req);

        assert!(scheduler.has_reminder(TaskId::new(7)));

        advance(120).await;
        let fired = drain(&mut rx);
        assert_eq!(fired.len(), 1);
        assert!(!fired[0].recurring);
        assert!(!scheduler.has_reminder(TaskId::new(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_fires_once() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        assert!(scheduler.schedule(request(&scheduler, 16, 2, Some(Duration::ZERO))));

        advance(30).await;
        let fired = drain(&mut rx);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].occurrence, 1);
        assert!(!scheduler.has_reminder(TaskId::new(16)));
    }

    #[tokio::test(start_paused = true)]
    async fn notifier_failure_does_not_stop_recurrence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = FailingNotifier { calls: calls.clone() };
        let scheduler = scheduler_with(notifier, TimerSettings::default());

        scheduler.schedule(request(&scheduler, 8, 1, Some(Duration::from_secs(10))));
        scheduler.schedule(request(&scheduler, 9, 1, None));

        advance(32).await;
        // task 8: 1s, 11s, 21s, 31s; task 9: 1s
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(scheduler.has_reminder(TaskId::new(8)));
        assert!(!scheduler.has_reminder(TaskId::new(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_notifier_does_not_stop_recurrence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = PanickingNotifier { calls: calls.clone() };
        let scheduler = scheduler_with(notifier, TimerSettings::default());

        scheduler.schedule(request(&scheduler, 17, 1, Some(Duration::from_secs(5))));
        scheduler.schedule(request(&scheduler, 18, 1, None));

        advance(12).await;
        // task 17: 1s, 6s, 11s; task 18: 1s
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(scheduler.has_reminder(TaskId::new(17)));
        assert!(!scheduler.has_reminder(TaskId::new(18)));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_notifier_is_timed_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = HangingNotifier { calls: calls.clone() };
        let settings = TimerSettings {
            notify_timeout: Duration::from_secs(1),
            ..TimerSettings::default()
        };
        let scheduler = scheduler_with(notifier, settings);

        scheduler.schedule(request(&scheduler, 10, 1, Some(Duration::from_secs(5))));
        advance(12).await;
        // fires at 1s, 6s, 11s despite each call hanging
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_policy_drops_ticks_missed_by_slow_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier = SlowNotifier {
            delay: Duration::from_secs(12),
            seen: seen.clone(),
        };
        let settings = TimerSettings {
            missed_ticks: MissedTickPolicy::Skip,
            ..TimerSettings::default()
        };
        let scheduler = scheduler_with(notifier, settings);
        let req = request(&scheduler, 11, 5, Some(Duration::from_secs(5)));
        let deadline = req.deadline;
        scheduler.schedule(req);

        advance(21).await;
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].fired_at - deadline, chrono::Duration::seconds(15));
        assert_eq!(seen[1].occurrence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_policy_fires_every_missed_tick() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier = SlowNotifier {
            delay: Duration::from_secs(12),
            seen: seen.clone(),
        };
        let settings = TimerSettings {
            missed_ticks: MissedTickPolicy::Burst,
            ..TimerSettings::default()
        };
        let scheduler = scheduler_with(notifier, settings);
        let req = request(&scheduler, 12, 5, Some(Duration::from_secs(5)));
        let deadline = req.deadline;
        scheduler.schedule(req);

        advance(30).await;
        let offsets: Vec<i64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.fired_at - deadline).num_seconds())
            .collect();
        assert_eq!(offsets, vec![0, 5, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        scheduler.schedule(request(&scheduler, 13, 5, None));
        scheduler.schedule(request(&scheduler, 14, 5, Some(Duration::from_secs(5))));
        assert_eq!(scheduler.pending().len(), 2);

        scheduler.shutdown();
        assert!(scheduler.pending().is_empty());
        advance(60).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_scheduler_cancels_timers() {
        let (scheduler, mut rx) = channel_scheduler(TimerSettings::default());
        scheduler.schedule(request(&scheduler, 15, 5, Some(Duration::from_secs(5))));
        drop(scheduler);

        advance(60).await;
        assert!(drain(&mut rx).is_empty());
    }
}
