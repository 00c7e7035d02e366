use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;

use foodlens::config::{ConfigError, RecognizerConfig};
use foodlens::history::{HistoryError, HistoryRepository, SqliteHistoryStore};
use foodlens::models::{FoodResult, HistoryEntry};
use foodlens::pipeline::{
    ClassifierError, FoodRecognizer, PipelineOutcome, PreprocessError, RawImage,
    RemoteClassifier, ResultResolver,
};
use foodlens::session::SessionContext;

/// Recognize food in a photo and report its nutrition.
#[derive(Debug, Parser)]
#[command(name = "foodlens", author, version, about)]
struct Cli {
    /// Optional settings JSON; FOODLENS_* environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify one photo with the configured strategy.
    Classify {
        /// JPEG, PNG, GIF or TIFF photo.
        image: PathBuf,

        /// Signed-in owner id, required by --save.
        #[arg(long)]
        owner: Option<String>,

        /// Store a recognized result in the history database.
        #[arg(long, requires = "owner")]
        save: bool,

        /// Attach local health advice to on-device results.
        #[arg(long)]
        recommend: bool,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List saved results for an owner, newest first.
    History {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        json: bool,
    },
    /// Check the classification backend.
    Health,
    /// List foods the classification backend knows.
    Foods,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    foodlens::init_tracing();
    let cli = Cli::parse();
    tracing::debug!("FoodLens v{}", foodlens::version());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = RecognizerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Classify {
            image,
            owner,
            save,
            recommend,
            json,
        } => {
            let recognizer = FoodRecognizer::from_config(&config)?.with_resolver(
                ResultResolver::default().with_local_recommendations(recommend),
            );
            recognizer.warm_up().await?;

            let raw = RawImage::from_path(&image)?;
            let outcome = recognizer.recognize(&raw).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }

            if save {
                let session = owner.map(SessionContext::authenticated).unwrap_or_default();
                let repo = HistoryRepository::new(Box::new(SqliteHistoryStore::open(
                    &config.history_db_path()?,
                )?));
                if let Some(id) = repo.save_outcome(&session, &outcome)? {
                    println!("Saved to history: {id}");
                }
            }

            Ok(match outcome {
                PipelineOutcome::Recognized(_) => ExitCode::SUCCESS,
                _ => ExitCode::from(2),
            })
        }
        Command::History { owner, json } => {
            let repo = HistoryRepository::new(Box::new(SqliteHistoryStore::open(
                &config.history_db_path()?,
            )?));
            let entries = repo.list(&SessionContext::authenticated(owner))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_history(&entries);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let remote = RemoteClassifier::new(&config.endpoint, config.timeout())?;
            let health = remote.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(if health.success && health.model_loaded {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Command::Foods => {
            let remote = RemoteClassifier::new(&config.endpoint, config.timeout())?;
            for food in remote.available_foods().await? {
                println!("{food}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_outcome(outcome: &PipelineOutcome) {
    match outcome {
        PipelineOutcome::Recognized(result) => print_result(result),
        PipelineOutcome::Failed(failure) => {
            println!("Recognition failed: {}", failure.message);
            if failure.is_retryable() {
                println!("Try again.");
            } else {
                println!("Try a different photo.");
            }
        }
        PipelineOutcome::ModelNotReady => println!("Model is still loading."),
        PipelineOutcome::Busy => println!("Another recognition is in progress."),
        PipelineOutcome::Superseded => println!("Recognition was cancelled."),
    }
}

fn print_result(result: &FoodResult) {
    println!("{} ({:.1}%)", result.name, result.confidence * 100.0);
    let n = &result.nutrition;
    let calories = match n.calories.value() {
        Some(_) => format!("{} kcal", n.calories),
        None => n.calories.to_string(),
    };
    println!("  Calories: {calories}");
    println!("  Protein:  {}", n.protein.as_grams());
    println!("  Carbs:    {}", n.carbs.as_grams());
    println!("  Fat:      {}", n.fat.as_grams());
    if let Some(tip) = &result.recommendation {
        println!("  Tip:      {tip}");
    }
    for alt in &result.top_predictions {
        println!("  - {} ({:.1}%)", alt.food, alt.confidence * 100.0);
    }
}

fn print_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No history yet.");
        return;
    }
    for entry in entries {
        println!(
            "{}  {:<24} {} kcal",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.result.name,
            entry.result.nutrition.calories
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn save_requires_owner() {
        let err = Cli::try_parse_from(["foodlens", "classify", "meal.jpg", "--save"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let cli =
            Cli::try_parse_from(["foodlens", "classify", "meal.jpg", "--save", "--owner", "alice"])
                .unwrap();
        match cli.command {
            Command::Classify { owner, save, .. } => {
                assert!(save);
                assert_eq!(owner.as_deref(), Some("alice"));
            }
            other => panic!("expected classify, got {other:?}"),
        }
    }

    #[test]
    fn owner_without_save_is_accepted() {
        assert!(Cli::try_parse_from(["foodlens", "classify", "meal.jpg", "--owner", "alice"]).is_ok());
    }
}
