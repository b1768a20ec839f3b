use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shared progress state between a worker thread and whatever front end polls it.
#[derive(Default)]
pub struct OperationProgress {
    pub current_bytes: u64,
    pub total_bytes: u64,
    pub operation: String,
    pub finished: bool,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub log_messages: VecDeque<LogMessage>,
}

/// A log message from a worker thread.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl OperationProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the `Arc<Mutex<_>>` every operation takes.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Completion percentage in `0.0..=100.0`.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.finished { 100.0 } else { 0.0 };
        }
        (self.current_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

pub type Progress = Arc<Mutex<OperationProgress>>;

pub fn log(progress: &Progress, level: LogLevel, message: impl Into<String>) {
    if let Ok(mut p) = progress.lock() {
        p.log_messages.push_back(LogMessage {
            level,
            message: message.into(),
        });
    }
}

pub fn set_operation(progress: &Progress, op: impl Into<String>) {
    if let Ok(mut p) = progress.lock() {
        p.operation = op.into();
    }
}

pub fn is_cancelled(progress: &Progress) -> bool {
    progress.lock().map(|p| p.cancel_requested).unwrap_or(false)
}

pub fn request_cancel(progress: &Progress) {
    if let Ok(mut p) = progress.lock() {
        p.cancel_requested = true;
    }
}

pub fn set_progress(progress: &Progress, current: u64, total: u64) {
    if let Ok(mut p) = progress.lock() {
        p.current_bytes = current;
        p.total_bytes = total;
    }
}

pub fn finish(progress: &Progress, error: Option<String>) {
    if let Ok(mut p) = progress.lock() {
        p.error = error;
        p.finished = true;
    }
}

/// Push an error-level message for a failed operation. Cancellation is not a
/// failure and is passed through without a message.
pub fn log_failure<T>(
    progress: &Progress,
    operation: &str,
    result: crate::error::Result<T>,
) -> crate::error::Result<T> {
    if let Err(e) = &result {
        if !e.is_cancelled() {
            log(progress, LogLevel::Error, format!("{operation} failed: {e}"));
        }
    }
    result
}

/// Returns `Err(Cancelled)` once cancellation has been requested.
pub fn check_cancel(progress: &Progress) -> crate::error::Result<()> {
    if is_cancelled(progress) {
        return Err(crate::error::XisoError::Cancelled);
    }
    Ok(())
}
