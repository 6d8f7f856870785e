// src/service.rs

use crate::config::HistorianConfig;
use crate::context::{ContextAssembler, EvolutionQuery};
use crate::error::{HistorianError, Result};
use crate::generation::TextGenerator;
use crate::history;
use crate::interpret::{
    ArchitecturalDecision, EvolutionResult, PatternResult, ResponseInterpreter,
};
use crate::model::*;
use crate::snapshot::{self, Snapshot};
use crate::store::Store;
use crate::tasks::{TaskId, TaskRegistry, TaskStatus};
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A registered repository and the background task filling in its history
#[derive(Debug, Clone)]
pub struct Ingestion {
    pub repository: Repository,
    pub task_id: TaskId,
}

/// Builds the progress bar handed to one ingestion
pub type ProgressFactory = Arc<dyn Fn() -> ProgressBar + Send + Sync>;

/// Entry points for ingestion and the three analysis modes
pub struct Historian {
    store: Arc<Store>,
    interpreter: ResponseInterpreter,
    tasks: TaskRegistry,
    config: HistorianConfig,
    progress: ProgressFactory,
}

/// Repository, commits and (when path-scoped) changed paths for one query
type QueryInputs = (
    Repository,
    Vec<StoredCommit>,
    Option<HashMap<CommitId, Vec<String>>>,
);

async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HistorianError::task(format!("blocking task failed: {e}")))?
}

impl Historian {
    pub fn new(
        store: Arc<Store>,
        generator: Arc<dyn TextGenerator>,
        config: HistorianConfig,
    ) -> Self {
        Self {
            store,
            interpreter: ResponseInterpreter::new(generator, config.generation.clone()),
            tasks: TaskRegistry::new(),
            config,
            progress: Arc::new(ProgressBar::hidden),
        }
    }

    /// Reports each ingestion on a fresh bar from `factory` instead of a hidden one.
    pub fn with_progress<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> ProgressBar + Send + Sync + 'static,
    {
        self.progress = Arc::new(factory);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.status(id)
    }

    /// Runs store work on the blocking pool; the connection lock is shared
    /// with background ingestion.
    async fn with_store<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        blocking(move || f(store.as_ref())).await
    }

    async fn query_inputs(
        &self,
        repository_id: RepositoryId,
        path_scoped: bool,
    ) -> Result<QueryInputs> {
        self.with_store(move |store| {
            let repository = store.require_repository(repository_id)?;
            let commits = store.list_commits(repository_id)?;
            let paths = if path_scoped {
                Some(store.changed_paths(repository_id)?)
            } else {
                None
            };
            Ok((repository, commits, paths))
        })
        .await
    }

    /// Registers a repository and starts its history walk in the background.
    ///
    /// Returns once file counts and languages are known; commits and file
    /// changes keep arriving after this returns. A location that is not a
    /// repository still registers, with empty history.
    pub async fn begin_ingestion(
        &self,
        name: &str,
        location: &Path,
        url: Option<&str>,
    ) -> Result<Ingestion> {
        let path: PathBuf = location.to_path_buf();
        let scan_path = path.clone();
        let (total_files, languages) = blocking(move || {
            let files = history::tracked_files(&scan_path);
            let languages = crate::languages::detect_languages(&files);
            Ok((files.len() as u64, languages))
        })
        .await?;

        let new = NewRepository {
            name: name.to_string(),
            path: path.to_string_lossy().into_owned(),
            url: url.map(String::from),
            total_files,
            languages,
        };
        let repository = self
            .with_store(move |store| store.create_repository(&new))
            .await?;
        tracing::info!(
            repository_id = repository.id,
            name,
            total_files,
            "repository registered, extracting history in background"
        );

        let store = Arc::clone(&self.store);
        let repository_id = repository.id;
        let max_commits = self.config.ingestion.max_commits;
        let bar = (self.progress)();
        let task_id = self.tasks.spawn(format!("ingest:{repository_id}"), async move {
            blocking(move || history::ingest_history(&store, repository_id, max_commits, &bar))
                .await
        });

        Ok(Ingestion {
            repository,
            task_id,
        })
    }

    async fn load_snapshot(&self, repository: &Repository) -> Result<Snapshot> {
        let root = PathBuf::from(&repository.path);
        let cfg = self.config.snapshot.clone();
        blocking(move || Ok(snapshot::collect_snapshot(&root, &cfg))).await
    }

    async fn persist<T: Serialize>(
        &self,
        repository_id: RepositoryId,
        kind: AnalysisKind,
        file_path: Option<&str>,
        result: &T,
    ) -> Result<Analysis> {
        let new = NewAnalysis {
            repository_id,
            commit_id: None,
            file_path: file_path.map(String::from),
            kind,
            result: serde_json::to_value(result)?,
        };
        let analysis = self
            .with_store(move |store| store.insert_analysis(&new))
            .await?;
        tracing::info!(
            repository_id,
            analysis_id = analysis.id,
            kind = kind.as_str(),
            "analysis stored"
        );
        Ok(analysis)
    }

    pub async fn ask_evolution_question(
        &self,
        repository_id: RepositoryId,
        question: &str,
        file_path: Option<&str>,
        date_range: Option<DateRange>,
    ) -> Result<EvolutionResult> {
        let (repository, commits, paths) =
            self.query_inputs(repository_id, file_path.is_some()).await?;
        let snapshot = self.load_snapshot(&repository).await?;

        let query = EvolutionQuery {
            question: question.to_string(),
            file_path: file_path.map(String::from),
            date_range,
        };
        let ctx = ContextAssembler::new(&self.config.context).evolution(
            &repository,
            &commits,
            paths.as_ref(),
            &query,
            &snapshot,
        );

        let interpreted = self.interpreter.evolution(&ctx).await?;
        self.persist(
            repository_id,
            AnalysisKind::Evolution,
            file_path,
            &interpreted.result,
        )
        .await?;
        Ok(interpreted.result)
    }

    pub async fn detect_patterns(
        &self,
        repository_id: RepositoryId,
        file_path: Option<&str>,
    ) -> Result<Vec<PatternResult>> {
        let (repository, commits, paths) =
            self.query_inputs(repository_id, file_path.is_some()).await?;
        let snapshot = self.load_snapshot(&repository).await?;

        let ctx = ContextAssembler::new(&self.config.context).pattern(
            &repository,
            &commits,
            paths.as_ref(),
            file_path,
            &snapshot,
        );

        let interpreted = self.interpreter.patterns(&ctx).await?;
        self.persist(
            repository_id,
            AnalysisKind::Pattern,
            file_path,
            &interpreted.result,
        )
        .await?;
        Ok(interpreted.result)
    }

    pub async fn detect_architectural_decisions(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<ArchitecturalDecision>> {
        let (repository, commits, _) = self.query_inputs(repository_id, false).await?;
        let snapshot = self.load_snapshot(&repository).await?;

        let ctx = ContextAssembler::new(&self.config.context).architecture(
            &repository,
            &commits,
            &snapshot,
        );

        let interpreted = self.interpreter.architecture(&ctx).await?;
        self.persist(
            repository_id,
            AnalysisKind::Architecture,
            None,
            &interpreted.result,
        )
        .await?;
        Ok(interpreted.result)
    }
}
