//! Menu-driven front end used when no subcommand is given.

use std::path::PathBuf;

use dialoguer::{Confirm, Input, Select};

use crate::commands::{self, App, SyncOptions};

/// Top-level actions offered by the menu.
enum Action {
    Preview,
    DryRun,
    Sync,
    SmokeTest,
    Schedule,
    Locations,
    History,
    Validate,
}

impl Action {
    const ALL: &[Self] = &[
        Self::DryRun,
        Self::Sync,
        Self::Preview,
        Self::SmokeTest,
        Self::Schedule,
        Self::Locations,
        Self::History,
        Self::Validate,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Preview => "Preview a source file",
            Self::DryRun => "Dry run (plan without writing)",
            Self::Sync => "Sync prices and stock",
            Self::SmokeTest => "Smoke test a single inventory write",
            Self::Schedule => "Run on a schedule",
            Self::Locations => "List shop locations",
            Self::History => "Show sync history",
            Self::Validate => "Validate configuration",
        }
    }
}

/// Prompts for an action and its inputs, then runs it.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected action fails.
pub async fn run(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Action::ALL[idx] {
        Action::Preview => {
            let file = prompt_source(app)?;
            let rows: usize = Input::new()
                .with_prompt("Rows to show")
                .default(10)
                .interact_text()?;
            commands::preview(&file, rows)?;
        }
        Action::DryRun => {
            let file = prompt_source(app)?;
            let options = SyncOptions {
                dry_run: true,
                full_chain: prompt_full_chain()?,
                ..SyncOptions::default()
            };
            commands::sync(app, Some(&file), options).await?;
        }
        Action::Sync => {
            let file = prompt_source(app)?;
            let options = SyncOptions {
                full_chain: prompt_full_chain()?,
                ..SyncOptions::default()
            };
            commands::sync(app, Some(&file), options).await?;
        }
        Action::SmokeTest => {
            let file = prompt_source(app)?;
            commands::smoke_test(app, Some(&file), false).await?;
        }
        Action::Schedule => {
            let file = prompt_source(app)?;
            let minutes: u64 = Input::new()
                .with_prompt("Interval in minutes")
                .default(app.config.schedule.interval_minutes)
                .interact_text()?;
            commands::schedule(app, Some(&file), Some(minutes)).await?;
        }
        Action::Locations => commands::locations(app).await?,
        Action::History => {
            commands::history(app, false)?;
        }
        Action::Validate => {
            let file = prompt_source(app)?;
            commands::validate(app, Some(&file), false)?;
        }
    }

    Ok(())
}

fn prompt_source(app: &App) -> Result<PathBuf, dialoguer::Error> {
    let mut input = Input::<String>::new().with_prompt("Source file (CSV or DBF)");
    if let Some(path) = &app.config.sync.source_path {
        input = input.default(path.display().to_string());
    }
    Ok(PathBuf::from(input.interact_text()?.trim()))
}

fn prompt_full_chain() -> Result<bool, dialoguer::Error> {
    Confirm::new()
        .with_prompt("Also match by product name when the SKU is empty?")
        .default(false)
        .interact()
}
