// src/main.rs

mod cli;

use chrono::{NaiveDate, TimeZone, Utc};
use clap::Parser;
use cli::{Args, Command};
use indicatif::{ProgressBar, ProgressStyle};
use repo_historian::generation::{MessagesClient, TextGenerator};
use repo_historian::model::DateRange;
use repo_historian::tasks::TaskStatus;
use repo_historian::{Historian, HistorianConfig, Result, Store};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn date_range(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Option<DateRange> {
    let (since, until) = (since?, until?);
    let start = Utc.from_utc_datetime(&since.and_hms_opt(0, 0, 0)?);
    let end = Utc.from_utc_datetime(&until.and_hms_opt(23, 59, 59)?);
    Some(DateRange::new(start, end))
}

fn default_name(path: &Path) -> String {
    path.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| path.display().to_string())
}

fn ingest_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}") {
        bar.set_style(style);
    }
    bar
}

/// Historian backed by the configured generation service
fn analyst(store: &Arc<Store>, config: HistorianConfig) -> Result<Historian> {
    let generator: Arc<dyn TextGenerator> =
        Arc::new(MessagesClient::from_config(&config.generation)?);
    Ok(Historian::new(Arc::clone(store), generator, config))
}

async fn run(args: Args) -> Result<()> {
    let mut config = HistorianConfig::load(args.config.as_deref())?;
    let db_path = args.db.clone().unwrap_or_else(|| config.resolved_db_path());
    let store = Arc::new(Store::open(&db_path)?);

    match args.command {
        Command::Repos => print_json(&store.list_repositories()?),
        Command::Analyses { repo_id } => {
            store.require_repository(repo_id)?;
            print_json(&store.list_analyses(repo_id)?)
        }
        Command::Ingest {
            path,
            name,
            origin,
            max_commits,
        } => {
            if let Some(max) = max_commits {
                config.ingestion.max_commits = max;
            }

            // Ingestion never calls the generator.
            let historian = Historian::new(Arc::clone(&store), Arc::new(Offline), config)
                .with_progress(ingest_bar);
            let name = name.unwrap_or_else(|| default_name(&path));
            let started = Instant::now();
            let ingestion = historian
                .begin_ingestion(&name, &path, origin.as_deref())
                .await?;

            let status = historian.tasks().wait(ingestion.task_id).await?;
            if let TaskStatus::Failed { error } = &status {
                eprintln!("History extraction failed: {error}");
            }
            let repository = store.require_repository(ingestion.repository.id)?;
            eprintln!("Ingestion finished in {:.2?}.", started.elapsed());
            print_json(&repository)
        }
        Command::Ask {
            repo_id,
            question,
            file,
            since,
            until,
        } => {
            let historian = analyst(&store, config)?;
            let answer = historian
                .ask_evolution_question(
                    repo_id,
                    &question,
                    file.as_deref(),
                    date_range(since, until),
                )
                .await?;
            print_json(&answer)
        }
        Command::Patterns { repo_id, file } => {
            let historian = analyst(&store, config)?;
            print_json(&historian.detect_patterns(repo_id, file.as_deref()).await?)
        }
        Command::Architecture { repo_id } => {
            let historian = analyst(&store, config)?;
            print_json(&historian.detect_architectural_decisions(repo_id).await?)
        }
    }
}

/// Generator for commands that never reach the generation boundary
struct Offline;

#[async_trait::async_trait]
impl TextGenerator for Offline {
    async fn generate(
        &self,
        _request: &repo_historian::generation::GenerationRequest,
    ) -> Result<String> {
        Err(repo_historian::HistorianError::generation(
            "no generator configured for this command",
        ))
    }
}

#[tokio::main]
async fn main() {
    repo_historian::logging::init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(code = e.category().as_str(), error = %e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_historian::error::ErrorCategory;

    #[test]
    fn analysis_commands_need_a_configured_key() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut config = HistorianConfig::default();
        config.generation.api_key_env = "HISTORIAN_TEST_KEY_THAT_IS_NEVER_SET".into();

        let err = analyst(&store, config).err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[test]
    fn until_covers_the_whole_day() {
        let range = date_range(
            NaiveDate::from_ymd_opt(2023, 3, 1),
            NaiveDate::from_ymd_opt(2023, 6, 1),
        )
        .unwrap();
        assert_eq!(range.start.to_rfc3339(), "2023-03-01T00:00:00+00:00");
        assert_eq!(range.end.to_rfc3339(), "2023-06-01T23:59:59+00:00");
        assert!(date_range(NaiveDate::from_ymd_opt(2023, 3, 1), None).is_none());
    }
}
