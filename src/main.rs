//! flashcards-import CLI
//!
//! Imports flashcards from a CSV file into a folder of the hosted backend,
//! or checks how a file would be parsed without importing it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flashcards_import::commands::{import_csv, preview_csv};
use flashcards_import::config::Config;
use flashcards_import::error::AppError;
use flashcards_import::import::{ImportPhase, ImportProgress};
use flashcards_import::state::AppState;

/// Bulk flashcard import from CSV files
#[derive(Parser, Debug)]
#[command(name = "flashcards-import", author, version, about)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a CSV file into a folder
    ///
    /// The header row must name a front column ("Przód", "Przod", "front" or
    /// "Front") and a back column ("Tył", "Tyl", "back" or "Back"). An
    /// optional "known" column marks cards as learned.
    Import {
        /// CSV file to import
        file: PathBuf,

        /// Destination folder id
        #[arg(long)]
        folder: Option<String>,

        /// Owner of the imported cards (overrides FLASHCARDS_USER_ID)
        #[arg(long)]
        user: Option<String>,
    },

    /// Show what each delimiter would import, without writing anything
    Check {
        /// CSV file to inspect
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match args.command {
        Command::Import { file, folder, user } => run_import(file, folder, user).await,
        Command::Check { file } => {
            run_check(file).await;
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let presentation = e.to_presentation();
            eprintln!("{}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("  {}", action);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run_import(
    file: PathBuf,
    folder: Option<String>,
    user: Option<String>,
) -> Result<(), AppError> {
    let config = Config::from_env()?;
    let state = AppState::from_config(&config)?;

    if user.is_some() {
        state.set_user_id(user).await;
    }
    state.set_import_folder(folder).await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping import");
                cancel.cancel();
            }
        });
    }

    let observer = |progress: &ImportProgress| {
        if progress.phase == ImportPhase::Importing {
            eprintln!("Imported {} flashcards...", progress.processed_count);
        }
    };

    let outcome = import_csv(&state, file, Arc::new(observer), cancel).await?;

    println!("{}", outcome.report.summary());
    match outcome.cards {
        Some(cards) => info!("Folder now holds {} flashcards", cards.len()),
        None => eprintln!("Imported cards could not be reloaded; refresh the folder to see them."),
    }

    Ok(())
}

async fn run_check(file: PathBuf) {
    for preview in preview_csv(&file).await {
        match preview.error {
            Some(error) => println!("{:<6} error: {}", preview.attempt, error),
            None => println!(
                "{:<6} separator {:<6} card columns: {:<5} rows: {:<6} skipped: {}",
                preview.attempt,
                preview.delimiter.as_deref().unwrap_or("-"),
                if preview.card_columns { "yes" } else { "no" },
                preview.accepted,
                preview.skipped
            ),
        }
    }
}
