// tests/service.rs

mod common;

use async_trait::async_trait;
use common::TestRepo;
use indicatif::ProgressBar;
use pretty_assertions::assert_eq;
use repo_historian::error::ErrorCategory;
use repo_historian::generation::{GenerationRequest, TextGenerator};
use repo_historian::interpret::{Impact, ANALYSIS_ERROR};
use repo_historian::model::AnalysisKind;
use repo_historian::tasks::TaskStatus;
use repo_historian::{Historian, HistorianConfig, HistorianError, Result, Store};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const DAY: i64 = 86_400;
const T0: i64 = 1_650_000_000;

/// Replies with a fixed text, or fails, and remembers every request
struct ScriptedGenerator {
    reply: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply
            .clone()
            .ok_or_else(|| HistorianError::generation("quota exceeded"))
    }
}

fn historian(generator: Arc<ScriptedGenerator>) -> Historian {
    let store = Arc::new(Store::open_in_memory().unwrap());
    Historian::new(store, generator, HistorianConfig::default())
}

fn fixture() -> TestRepo {
    let repo = TestRepo::new();
    repo.write("README.md", "# fixture\n");
    repo.write("docs/guide.md", "Read me first.\n");
    repo.commit("write the guide", T0);
    repo.write("src/parser.ts", "export function parse(s: string) {\n  return s;\n}\n");
    repo.write("src/lexer.py", "def lex(s):\n    return s.split()\n");
    repo.commit("add parser module", T0 + DAY);
    repo
}

async fn ingested(historian: &Historian, repo: &TestRepo) -> i64 {
    let ingestion = historian
        .begin_ingestion("fixture", repo.path(), Some("https://example.com/fixture.git"))
        .await
        .unwrap();
    let status = historian.tasks().wait(ingestion.task_id).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    ingestion.repository.id
}

#[tokio::test]
async fn ingestion_registers_then_fills_history_in_background() {
    let repo = fixture();
    let historian = historian(ScriptedGenerator::replying("{}"));

    let ingestion = historian
        .begin_ingestion("fixture", repo.path(), None)
        .await
        .unwrap();
    let registered = &ingestion.repository;
    assert_eq!(registered.name, "fixture");
    assert_eq!(registered.total_files, 4);
    let expected: BTreeSet<String> = ["Markdown", "Python", "TypeScript"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(registered.languages, expected);

    let status = historian.tasks().wait(ingestion.task_id).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(
        historian.task_status(ingestion.task_id),
        Some(TaskStatus::Completed)
    );

    let stored = historian
        .store()
        .require_repository(registered.id)
        .unwrap();
    assert_eq!(stored.total_commits, 2);
    assert!(stored.last_analyzed_at.is_some());
    assert_eq!(historian.store().commit_count(registered.id).unwrap(), 2);
}

#[tokio::test]
async fn non_repository_locations_ingest_as_empty_history() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();
    let historian = historian(ScriptedGenerator::replying(
        r#"{"answer": "nothing to see", "relevantCommits": []}"#,
    ));

    let ingestion = historian
        .begin_ingestion("plain", dir.path(), None)
        .await
        .unwrap();
    assert_eq!(ingestion.repository.total_files, 1);
    let status = historian.tasks().wait(ingestion.task_id).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let id = ingestion.repository.id;
    assert_eq!(historian.store().require_repository(id).unwrap().total_commits, 0);

    let answer = historian
        .ask_evolution_question(id, "what happened?", None, None)
        .await
        .unwrap();
    assert_eq!(answer.answer, "nothing to see");
}

#[tokio::test]
async fn evolution_answers_are_parsed_and_stored() {
    let repo = fixture();
    let generator = ScriptedGenerator::replying(
        "Here is what I found:\n{\"answer\": \"The parser arrived second.\", \
         \"relevantCommits\": [\"abc12345\"], \"keyInsights\": [\"docs first\"], \
         \"patterns\": [\"incremental\"]}\nHope that helps.",
    );
    let historian = historian(Arc::clone(&generator));
    let id = ingested(&historian, &repo).await;

    let result = historian
        .ask_evolution_question(id, "When did parsing show up?", None, None)
        .await
        .unwrap();
    assert_eq!(result.answer, "The parser arrived second.");
    assert_eq!(result.relevant_commits, vec!["abc12345"]);
    assert_eq!(result.business_context, None);

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("When did parsing show up?"));
    assert!(prompts[0].contains("add parser module"));
    assert!(prompts[0].contains("write the guide"));
    assert!(!prompts[0].contains("dateRange"));

    let analyses = historian.store().list_analyses(id).unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].kind, AnalysisKind::Evolution);
    assert_eq!(analyses[0].commit_id, None);
    assert_eq!(analyses[0].result["answer"], "The parser arrived second.");
}

#[tokio::test]
async fn file_filter_narrows_the_commits_sent() {
    let repo = fixture();
    let generator = ScriptedGenerator::replying(r#"{"answer": "ok"}"#);
    let historian = historian(Arc::clone(&generator));
    let id = ingested(&historian, &repo).await;

    historian
        .ask_evolution_question(id, "How did src change?", Some("src"), None)
        .await
        .unwrap();

    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("add parser module"));
    assert!(!prompt.contains("write the guide"));

    let analyses = historian.store().list_analyses(id).unwrap();
    assert_eq!(analyses[0].file_path.as_deref(), Some("src"));
}

#[tokio::test]
async fn unparseable_pattern_output_falls_back() {
    let repo = fixture();
    let historian = historian(ScriptedGenerator::replying(
        "I could not find any patterns worth mentioning.",
    ));
    let id = ingested(&historian, &repo).await;

    let patterns = historian.detect_patterns(id, None).await.unwrap();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].pattern, ANALYSIS_ERROR);
    assert_eq!(patterns[0].impact, Impact::Low);

    let analyses = historian.store().list_analyses(id).unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].kind, AnalysisKind::Pattern);
}

#[tokio::test]
async fn architectural_decisions_round_trip() {
    let repo = fixture();
    let generator = ScriptedGenerator::replying(
        r#"[
            {"decision": "Split lexer from parser", "rationale": "testability",
             "commit": "abc12345", "impact": "two modules", "alternatives": ["single file"]},
            {"decision": "Document first", "rationale": "onboarding",
             "commit": "def67890", "impact": "docs folder", "alternatives": []}
        ]"#,
    );
    let historian = historian(Arc::clone(&generator));
    let id = ingested(&historian, &repo).await;

    let decisions = historian.detect_architectural_decisions(id).await.unwrap();
    let names: Vec<_> = decisions.iter().map(|d| d.decision.as_str()).collect();
    assert_eq!(names, vec!["Split lexer from parser", "Document first"]);
    assert_eq!(decisions[0].alternatives, vec!["single file"]);

    let analyses = historian.store().list_analyses(id).unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].kind, AnalysisKind::Architecture);
    assert_eq!(analyses[0].result.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn unknown_repository_is_not_found_without_calling_the_generator() {
    let generator = ScriptedGenerator::replying("{}");
    let historian = historian(Arc::clone(&generator));

    let err = historian
        .ask_evolution_question(404, "anything?", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);

    let err = historian.detect_patterns(404, None).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);

    let err = historian.detect_architectural_decisions(404).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);

    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn generation_failures_surface_and_store_nothing() {
    let repo = fixture();
    let historian = historian(ScriptedGenerator::failing());
    let id = ingested(&historian, &repo).await;

    let err = historian
        .ask_evolution_question(id, "why?", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Generation);
    assert!(err.to_string().starts_with("analysis failed"));

    assert!(historian.store().list_analyses(id).unwrap().is_empty());
}

#[tokio::test]
async fn each_ingestion_gets_its_own_progress_bar() {
    let first = fixture();
    let second = fixture();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let historian = historian(ScriptedGenerator::replying("{}")).with_progress(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        ProgressBar::hidden()
    });

    let a = historian
        .begin_ingestion("first", first.path(), None)
        .await
        .unwrap();
    let b = historian
        .begin_ingestion("second", second.path(), None)
        .await
        .unwrap();
    assert_eq!(historian.tasks().wait(a.task_id).await.unwrap(), TaskStatus::Completed);
    assert_eq!(historian.tasks().wait(b.task_id).await.unwrap(), TaskStatus::Completed);

    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert_eq!(historian.store().commit_count(a.repository.id).unwrap(), 2);
    assert_eq!(historian.store().commit_count(b.repository.id).unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queries_run_while_history_is_still_being_written() {
    let repo = fixture();
    let generator = ScriptedGenerator::replying(r#"[{"pattern": "Layering", "impact": "high"}]"#);
    let historian = historian(Arc::clone(&generator));

    let ingestion = historian
        .begin_ingestion("fixture", repo.path(), None)
        .await
        .unwrap();
    let id = ingestion.repository.id;

    // The background walk may or may not have finished; either way the
    // query reads a consistent store and its result is persisted.
    let patterns = historian.detect_patterns(id, None).await.unwrap();
    assert_eq!(patterns[0].pattern, "Layering");
    assert_eq!(patterns[0].impact, Impact::High);

    let status = historian.tasks().wait(ingestion.task_id).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(historian.store().list_analyses(id).unwrap().len(), 1);
    assert_eq!(historian.store().commit_count(id).unwrap(), 2);
}
