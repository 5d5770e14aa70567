//! Outbound notification collaborators.
//!
//! The scheduler hands every firing to a [`Notifier`]. Delivery (printing,
//! pushing to a UI, sending mail) is the notifier's business; failures are
//! reported back as errors and the scheduler only logs them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::task::TaskId;

/// Payload of a single reminder firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub task_id: TaskId,
    /// Title as it was when the reminder was scheduled
    pub title: String,
    /// Nominal wall-clock instant of this firing
    pub fired_at: DateTime<Utc>,
    pub recurring: bool,
    /// 1-based count of firings for the current handle
    pub occurrence: u64,
}

/// Receives reminder firings.
///
/// Implementations must not block the calling task indefinitely; the
/// scheduler bounds each call with a timeout.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()>;
}

/// Emits each reminder as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
        tracing::info!(
            task_id = %reminder.task_id,
            fired_at = %reminder.fired_at,
            occurrence = reminder.occurrence,
            recurring = reminder.recurring,
            "Reminder: {}",
            reminder.title
        );
        Ok(())
    }
}

/// Forwards reminders into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Reminder>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<Reminder>) -> Self {
        Self { tx }
    }

    /// Create a notifier together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Reminder>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
        self.tx
            .send(reminder.clone())
            .map_err(|_| anyhow::anyhow!("reminder receiver dropped"))
    }
}
