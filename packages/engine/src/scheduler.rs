//! Timer-driven sync runs.
//!
//! A [`Scheduler`] owns at most one timer. Each tick re-reads the run
//! configuration through a [`RunConfigProvider`] and asks the shared
//! [`SyncOrchestrator`] for a run. A tick that finds a run already in
//! flight is skipped, never queued.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use stock_sync_models::{ErrorCode, RunConfig, RunStatus};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

use crate::{SyncError, SyncOrchestrator};

/// Supplies the configuration for each scheduled run.
pub trait RunConfigProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the stored configuration is
    /// incomplete.
    fn run_config(&self, source_path: &Path) -> Result<RunConfig, SyncError>;
}

impl<F> RunConfigProvider for F
where
    F: Fn(&Path) -> Result<RunConfig, SyncError> + Send + Sync,
{
    fn run_config(&self, source_path: &Path) -> Result<RunConfig, SyncError> {
        self(source_path)
    }
}

/// Coarse result of the last scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LastOutcome {
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl From<RunStatus> for LastOutcome {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success | RunStatus::DryRun => Self::Success,
            RunStatus::PartialSuccess => Self::Partial,
            RunStatus::Cancelled => Self::Cancelled,
            RunStatus::Failed | RunStatus::Running => Self::Failed,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A run finished with this status.
    Completed(RunStatus),
    /// Another run was in flight.
    Skipped,
    /// The run failed. `stopped` is set when the failure stopped the
    /// scheduler.
    Failed { stopped: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: Option<u64>,
    pub source_path: Option<PathBuf>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<LastOutcome>,
    pub skipped_ticks: u64,
}

#[derive(Default)]
struct State {
    status: SchedulerStatus,
    timer: Option<CancellationToken>,
}

struct Inner {
    orchestrator: Arc<SyncOrchestrator>,
    provider: Arc<dyn RunConfigProvider>,
    state: Mutex<State>,
}

/// Runs syncs on a fixed interval.
///
/// Cloning shares the same timer and status.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    #[must_use]
    pub fn new(orchestrator: Arc<SyncOrchestrator>, provider: Arc<dyn RunConfigProvider>) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                provider,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Starts a timer that runs a sync of `source_path` every `interval`,
    /// replacing any existing timer. The first run happens one interval
    /// from now.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// * [`ErrorCode::ConfigInvalid`] if `interval` is zero
    /// * [`SyncError::Source`] if the file is missing or unsupported
    pub fn start(
        &self,
        interval: Duration,
        source_path: impl Into<PathBuf>,
    ) -> Result<(), SyncError> {
        let source_path = source_path.into();
        if interval.is_zero() {
            return Err(SyncError::config(
                ErrorCode::ConfigInvalid,
                "Schedule interval must be positive",
            ));
        }
        stock_sync_source::detect::ensure_supported(&source_path)?;

        let token = CancellationToken::new();
        {
            let mut state = self.inner.state();
            if let Some(previous) = state.timer.replace(token.clone()) {
                previous.cancel();
            }
            state.status.running = true;
            state.status.interval_secs = Some(interval.as_secs());
            state.status.source_path = Some(source_path.clone());
        }
        log::info!(
            "[scheduler] syncing {} every {interval:?}",
            source_path.display()
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                inner.state().status.next_run_at =
                    TimeDelta::from_std(interval).ok().map(|d| Utc::now() + d);
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                inner.tick(token.child_token()).await;
                if token.is_cancelled() {
                    break;
                }
            }
            log::debug!("[scheduler] timer for {} ended", source_path.display());
        });

        Ok(())
    }

    /// Stops the timer and cancels a scheduled run in flight.
    pub fn stop(&self) {
        self.inner.stop();
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        self.inner.state().status.clone()
    }

    /// Runs one tick now, as the timer would.
    pub async fn run_tick(&self) -> TickOutcome {
        let cancel = self
            .inner
            .state()
            .timer
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        self.inner.tick(cancel).await
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        let mut state = self.state();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
            log::info!("[scheduler] stopped");
        }
        state.status.running = false;
        state.status.next_run_at = None;
    }

    fn skip(&self) -> TickOutcome {
        self.state().status.skipped_ticks += 1;
        log::info!("[scheduler] previous run still in progress, skipping tick");
        TickOutcome::Skipped
    }

    async fn tick(&self, cancel: CancellationToken) -> TickOutcome {
        if self.orchestrator.is_running() {
            return self.skip();
        }
        let Some(source_path) = self.state().status.source_path.clone() else {
            log::warn!("[scheduler] tick without a source file");
            return TickOutcome::Failed { stopped: false };
        };

        self.state().status.last_run_at = Some(Utc::now());
        let outcome = match self.provider.run_config(&source_path) {
            Ok(config) => self.orchestrator.run(&config, cancel).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                self.state().status.last_outcome = Some(result.status.into());
                TickOutcome::Completed(result.status)
            }
            Err(SyncError::AlreadyRunning) => self.skip(),
            Err(SyncError::Cancelled) => {
                self.state().status.last_outcome = Some(LastOutcome::Cancelled);
                TickOutcome::Completed(RunStatus::Cancelled)
            }
            Err(e) => {
                self.state().status.last_outcome = Some(LastOutcome::Failed);
                let stopped = e.requires_attention();
                if stopped {
                    log::error!("[scheduler] {e}; stopping until the configuration is fixed");
                    self.stop();
                } else {
                    log::warn!("[scheduler] run failed, retrying next tick: {e}");
                }
                TickOutcome::Failed { stopped }
            }
        }
    }
}
