//! Event reporting for sync runs.
//!
//! Defines a [`SyncEventSink`] trait that decouples run reporting from any
//! specific rendering backend (progress bars, log output, or silence).
//! Implementations that draw something live in the crates that choose a
//! rendering strategy.

use std::sync::Arc;

use stock_sync_models::{LogLevel, PlannedOperation, SyncLogEntry, SyncProgress, SyncResult};

/// Receives progress, log, and result events from the orchestrator.
///
/// Implementations must be `Send + Sync` so one sink can be shared between
/// the orchestrator and a scheduler task.
pub trait SyncEventSink: Send + Sync {
    /// Stage and percent changes.
    fn progress(&self, progress: &SyncProgress);

    /// A structured log line meant for the user.
    fn log(&self, entry: &SyncLogEntry);

    /// The plan, once matching and planning are done.
    fn preview_ready(&self, _planned: &[PlannedOperation]) {}

    /// The terminal result. Called exactly once per started run.
    fn complete(&self, result: &SyncResult);
}

/// A no-op [`SyncEventSink`] that ignores every event.
pub struct NullSink;

impl SyncEventSink for NullSink {
    fn progress(&self, _progress: &SyncProgress) {}
    fn log(&self, _entry: &SyncLogEntry) {}
    fn complete(&self, _result: &SyncResult) {}
}

/// Returns a shared [`NullSink`] instance for convenient use.
#[must_use]
pub fn null_sink() -> Arc<dyn SyncEventSink> {
    Arc::new(NullSink)
}

/// Forwards events to the `log` facade.
pub struct LogSink;

impl SyncEventSink for LogSink {
    fn progress(&self, progress: &SyncProgress) {
        log::debug!(
            "[sync] {} {}%: {}",
            progress.stage,
            progress.percent,
            progress.message
        );
    }

    fn log(&self, entry: &SyncLogEntry) {
        forward_log(entry);
    }

    fn complete(&self, result: &SyncResult) {
        log::info!(
            "[sync] run {} finished: {} ({} planned, {} succeeded, {} failed, {} skipped)",
            result.run_id,
            result.status,
            result.total_planned,
            result.total_success,
            result.total_failed,
            result.total_skipped
        );
    }
}

/// Writes a run log entry through the `log` facade at the matching level.
/// `success` entries are logged at info.
pub fn forward_log(entry: &SyncLogEntry) {
    let level = match entry.level {
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Info | LogLevel::Success => log::Level::Info,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Error => log::Level::Error,
    };
    match &entry.context {
        Some(context) => log::log!(level, "[{}] {} {context}", entry.category, entry.message),
        None => log::log!(level, "[{}] {}", entry.category, entry.message),
    }
}
