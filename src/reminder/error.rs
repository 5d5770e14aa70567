//! Reminder scheduler errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("Reminder scheduler requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

pub type Result<T> = std::result::Result<T, ReminderError>;
