#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for stock sync.
//!
//! Provides an `indicatif`-backed [`SyncEventSink`], plus [`init_logger`]
//! which sets up `indicatif-log-bridge` so that `log::info!` and friends
//! are suspended while progress bars redraw.
//!
//! Any binary that calls [`init_logger()`] at startup gets full progress bar
//! support for free.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use stock_sync_engine::SyncEventSink;
use stock_sync_engine::events::forward_log;
use stock_sync_models::{SyncLogEntry, SyncProgress, SyncResult};

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that renders sync events.
///
/// Starts as a spinner and becomes a percent bar on the first progress
/// event. Log entries go through the `log` facade, so they print above the
/// bar when [`init_logger`] is in use.
pub struct IndicatifSink {
    bar: ProgressBar,
    /// Style to switch to once the first progress event arrives.
    bar_style: ProgressStyle,
}

impl IndicatifSink {
    #[must_use]
    pub fn new(multi: &MultiProgress, message: &str) -> Arc<Self> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "  {msg:40} {wide_bar:.cyan/dim} {pos:>3}% [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }
}

impl SyncEventSink for IndicatifSink {
    fn progress(&self, progress: &SyncProgress) {
        if self.bar.length().is_none() {
            self.bar.set_length(100);
            self.bar.set_style(self.bar_style.clone());
        }
        self.bar.set_position(u64::from(progress.percent));
        self.bar.set_message(progress.message.clone());
    }

    fn log(&self, entry: &SyncLogEntry) {
        forward_log(entry);
    }

    fn complete(&self, result: &SyncResult) {
        self.bar.finish_with_message(format!(
            "{}: {} succeeded, {} failed, {} skipped",
            result.status, result.total_success, result.total_failed, result.total_skipped
        ));
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    // Build the pretty-env-logger logger manually so we can wrap it.
    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if logger was already set (e.g., in tests)

    log::set_max_level(level);

    multi
}
