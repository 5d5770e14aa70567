//! Reminder module - deadline timers and the notification seam.
//!
//! Per task id the handle lifecycle is:
//!
//! ```text
//! None -> Scheduled -> Fired      (one-shot, handle released)
//!                  \-> Fired -> Scheduled -> ...   (recurring)
//!                  \-> Cancelled  (edit, delete, shutdown)
//! ```

mod clock;
mod error;
mod notifier;
mod schedule;
mod scheduler;

pub use clock::{Clock, ClockKind, MonotonicClock, SystemClock};
pub use error::{ReminderError, Result};
pub use notifier::{ChannelNotifier, LogNotifier, Notifier, Reminder};
pub use schedule::{MissedTickPolicy, ReminderRequest};
pub use scheduler::{ReminderScheduler, TimerSettings, DEFAULT_NOTIFY_TIMEOUT};
