//! Error types for the reverie scheduler.

/// Top-level error type for the task scheduling subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Configuration load or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Task store error (persistence, snapshot (de)serialization).
    #[error("store error: {0}")]
    Store(String),

    /// No task with the given id exists in the store.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Cron expression parse error.
    #[error("cron error: {0}")]
    Cron(String),

    /// No matching cron occurrence within the search bound (366 days).
    #[error("no matching occurrence within the search window")]
    NoNextOccurrence,

    /// Task config failed handler validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Task execution error inside a handler.
    #[error("executor error: {0}")]
    Executor(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SchedulerError>;
