//! Implementations shared by the subcommands and the interactive menu.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dialoguer::Confirm;
use stock_sync_cli_utils::{IndicatifSink, MultiProgress};
use stock_sync_engine::{
    JsonHistoryStore, LogSink, RunConfigProvider as _, Scheduler, SyncEventSink, SyncOrchestrator,
    validators,
};
use stock_sync_models::{MatchMode, RunConfig, RunStatus, SyncResult};
use stock_sync_remote::{CatalogConnector as _, GraphqlConnector};
use stock_sync_source::extract::FieldExtractor;
use tokio_util::sync::CancellationToken;

use crate::config::{self, AppConfig, ConfigError, FileConfigProvider};
use crate::report;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Loaded configuration plus the terminal the commands draw on.
pub struct App {
    pub config_path: PathBuf,
    pub config: AppConfig,
    pub multi: MultiProgress,
}

impl App {
    /// Loads `config_path`, falling back to defaults when it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be parsed.
    pub fn load(config_path: PathBuf, multi: MultiProgress) -> Result<Self, ConfigError> {
        let config = if config_path.exists() {
            AppConfig::load(&config_path)?
        } else {
            log::warn!(
                "[config] {} not found, using defaults",
                config_path.display()
            );
            AppConfig::default()
        };
        Ok(Self {
            config_path,
            config,
            multi,
        })
    }

    fn run_config(&self, file: Option<&Path>) -> Result<RunConfig, ConfigError> {
        self.config.run_config(file, config::env_token())
    }

    fn history_store(&self) -> JsonHistoryStore {
        JsonHistoryStore::new(&self.config.history.path, self.config.history.max_entries)
    }

    fn orchestrator(&self, sink: Arc<dyn SyncEventSink>) -> Arc<SyncOrchestrator> {
        Arc::new(
            SyncOrchestrator::new(Arc::new(GraphqlConnector::default()), sink)
                .with_history(Arc::new(self.history_store())),
        )
    }

    fn progress_orchestrator(&self, message: &str) -> Arc<SyncOrchestrator> {
        self.orchestrator(IndicatifSink::new(&self.multi, message))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub yes: bool,
    pub full_chain: bool,
}

// ── Commands ────────────────────────────────────────────────────────

/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn preview(file: &Path, rows: usize) -> CommandResult {
    let preview = SyncOrchestrator::preview(file, rows)?;
    print!("{}", report::preview(&preview));
    Ok(())
}

/// Plans a run, shows the plan, and applies it after confirmation.
///
/// # Errors
///
/// Returns an error if the run fails or finishes with a failed status.
pub async fn sync(app: &App, file: Option<&Path>, options: SyncOptions) -> CommandResult {
    let mut run = app.run_config(file)?;
    run.dry_run |= options.dry_run;
    if options.full_chain {
        run.match_mode = MatchMode::FullChain;
    }

    let cancel = CancellationToken::new();
    let plan = until_ctrl_c(
        &cancel,
        app.progress_orchestrator("Planning")
            .plan(&run, cancel.clone()),
    )
    .await?;
    print!("{}", report::planned(&plan.planned));
    print!("{}", report::result(&plan));

    if run.dry_run || plan.planned.is_empty() {
        return Ok(());
    }
    if !options.yes
        && !Confirm::new()
            .with_prompt(format!(
                "Apply {} update(s) to {}?",
                plan.total_planned, run.credentials.shop_url
            ))
            .default(false)
            .interact()?
    {
        println!("Cancelled.");
        return Ok(());
    }

    let result = until_ctrl_c(
        &cancel,
        app.progress_orchestrator("Syncing")
            .run(&run, cancel.clone()),
    )
    .await?;
    print!("{}", report::result(&result));
    check_status(&result)
}

/// Plans a run and applies a single inventory update from it.
///
/// # Errors
///
/// Returns an error if planning or the test write fails.
pub async fn smoke_test(app: &App, file: Option<&Path>, yes: bool) -> CommandResult {
    let run = app.run_config(file)?;
    let cancel = CancellationToken::new();
    let orchestrator = app.progress_orchestrator("Planning");
    let plan = until_ctrl_c(&cancel, orchestrator.plan(&run, cancel.clone())).await?;

    if !yes
        && !Confirm::new()
            .with_prompt("Write one inventory update to the shop as a test?")
            .default(true)
            .interact()?
    {
        println!("Cancelled.");
        return Ok(());
    }

    let orchestrator = app.progress_orchestrator("Smoke test");
    let result = until_ctrl_c(
        &cancel,
        orchestrator.smoke_test(&run, &plan.planned, cancel.clone()),
    )
    .await?;
    print!("{}", report::result(&result));
    check_status(&result)
}

/// Runs syncs on a timer until Ctrl-C, or until a run fails in a way that
/// needs attention.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the timer cannot
/// start.
pub async fn schedule(
    app: &App,
    file: Option<&Path>,
    interval_minutes: Option<u64>,
) -> CommandResult {
    let source = file
        .map(Path::to_path_buf)
        .or_else(|| app.config.sync.source_path.clone())
        .ok_or(ConfigError::MissingSource)?;
    let minutes = interval_minutes.unwrap_or(app.config.schedule.interval_minutes);

    let provider = Arc::new(FileConfigProvider::new(app.config_path.clone()));
    let config = provider.run_config(&source)?;
    validators::validate_run_config(&config)?;

    let scheduler = Scheduler::new(app.orchestrator(Arc::new(LogSink)), provider);
    scheduler.start(Duration::from_secs(minutes.saturating_mul(60)), source.clone())?;
    println!(
        "Syncing {} every {minutes} minute(s). Press Ctrl-C to stop.",
        source.display()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                scheduler.stop();
                break;
            }
            _ = poll.tick() => {
                if !scheduler.status().running {
                    log::error!("[scheduler] stopped after a failed run, check the configuration");
                    break;
                }
            }
        }
    }

    let status = scheduler.status();
    println!(
        "Scheduler stopped. Last outcome: {}, skipped ticks: {}",
        status
            .last_outcome
            .map_or_else(|| "none".to_owned(), |o| o.to_string()),
        status.skipped_ticks
    );
    Ok(())
}

/// # Errors
///
/// Returns an error if the credentials are invalid or the request fails.
pub async fn locations(app: &App) -> CommandResult {
    let credentials = app.config.credentials(config::env_token())?;
    let client = GraphqlConnector::default().connect(&credentials)?;
    let locations = client.load_locations().await?.value;

    println!("{:<40} NAME", "ID");
    println!("{}", "-".repeat(60));
    for location in &locations {
        println!("{:<40} {}", location.id, location.name);
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the history file cannot be read or written.
pub fn history(app: &App, clear: bool) -> CommandResult {
    let store = app.history_store();
    if clear {
        store.clear()?;
        println!("History cleared.");
        return Ok(());
    }
    let entries = store.load()?;
    let stats = store.stats()?;
    print!("{}", report::history(&entries, &stats));
    Ok(())
}

/// Checks the configuration and that the mapped columns exist in the
/// source file, without contacting the shop.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate(app: &App, file: Option<&Path>, strict: bool) -> CommandResult {
    let run = app.run_config(file)?;
    validators::validate_run_config(&run)?;
    validators::validate_access_token(&run.credentials.access_token, strict)?;

    let preview = SyncOrchestrator::preview(&run.source_path, 1)?;
    FieldExtractor::new(&run.mapping)?
        .indexes()
        .check_headers(preview.headers.len())?;

    println!(
        "Configuration OK: {} ({} columns) -> {}",
        run.source_path.display(),
        preview.headers.len(),
        run.credentials.shop_url
    );
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Awaits `future`, cancelling `cancel` if Ctrl-C arrives first.
async fn until_ctrl_c<F: Future>(cancel: &CancellationToken, future: F) -> F::Output {
    let token = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[sync] cancelling, waiting for in-flight requests");
            token.cancel();
        }
    });
    let output = future.await;
    watcher.abort();
    output
}

fn check_status(result: &SyncResult) -> CommandResult {
    match result.status {
        RunStatus::Failed => Err(format!("Run {} failed", result.run_id).into()),
        _ => Ok(()),
    }
}
