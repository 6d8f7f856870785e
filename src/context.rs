// src/context.rs

use crate::config::ContextConfig;
use crate::error::Result;
use crate::model::*;
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::collections::HashMap;

/// Message fragments that mark a commit as architecturally significant
const MAJOR_COMMIT_KEYWORDS: &[&str] = &["refactor", "architecture", "redesign", "breaking"];

/// Commits touching more files than this count as major
const MAJOR_COMMIT_FILE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub hash: String,
    pub date: String,
    pub author: String,
    pub message: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

impl From<&Commit> for CommitSummary {
    fn from(commit: &Commit) -> Self {
        Self {
            hash: commit.short_hash().to_string(),
            date: commit.date.to_rfc3339(),
            author: commit.author_name.clone(),
            message: commit.message.clone(),
            files_changed: commit.files_changed,
            insertions: commit.insertions,
            deletions: commit.deletions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStats {
    pub name: String,
    pub languages: Vec<String>,
    /// Commits in scope for this payload
    pub commit_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    pub files: Vec<FileExcerpt>,
    pub key_files: Vec<String>,
    pub total_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRangePayload {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionContext {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRangePayload>,
    pub repository: RepositoryStats,
    pub commits: Vec<CommitSummary>,
    pub snapshot: SnapshotPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub repository: RepositoryStats,
    pub commits: Vec<CommitSummary>,
    pub snapshot: SnapshotPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureContext {
    pub repository: RepositoryStats,
    pub major_commits: Vec<CommitSummary>,
    pub snapshot: SnapshotPayload,
}

/// What an evolution question is scoped to
#[derive(Debug, Clone, Default)]
pub struct EvolutionQuery {
    pub question: String,
    pub file_path: Option<String>,
    pub date_range: Option<DateRange>,
}

/// Filters applied by linear scan before the per-query cap
#[derive(Debug, Clone, Default)]
pub struct CommitFilter<'a> {
    pub file_path: Option<&'a str>,
    pub date_range: Option<DateRange>,
}

fn path_matches(changed: &str, filter: &str) -> bool {
    let filter = filter.trim_end_matches('/');
    changed == filter || changed.starts_with(&format!("{filter}/"))
}

/// Filters `commits` (newest first) and keeps at most `cap` of them.
///
/// The cap applies after filtering, so the oldest matches are the ones dropped.
pub fn candidate_commits<'a>(
    commits: &'a [StoredCommit],
    filter: &CommitFilter<'_>,
    changed_paths: Option<&HashMap<CommitId, Vec<String>>>,
    cap: usize,
) -> Vec<&'a StoredCommit> {
    commits
        .iter()
        .filter(|c| {
            filter
                .date_range
                .map_or(true, |range| range.contains(c.commit.date))
        })
        .filter(|c| match filter.file_path {
            None => true,
            Some(wanted) => changed_paths
                .and_then(|paths| paths.get(&c.id))
                .map_or(false, |paths| paths.iter().any(|p| path_matches(p, wanted))),
        })
        .take(cap)
        .collect()
}

pub fn is_major_commit(commit: &Commit) -> bool {
    if commit.files_changed > MAJOR_COMMIT_FILE_THRESHOLD {
        return true;
    }
    let message = commit.message.to_lowercase();
    MAJOR_COMMIT_KEYWORDS.iter().any(|kw| message.contains(kw))
}

/// Rough token count used only for logging payload size
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn repository_stats(repository: &Repository, in_scope: &[&StoredCommit]) -> RepositoryStats {
    let earliest = in_scope.iter().map(|c| c.commit.date).min();
    let latest = in_scope.iter().map(|c| c.commit.date).max();
    RepositoryStats {
        name: repository.name.clone(),
        languages: repository.languages.iter().cloned().collect(),
        commit_count: in_scope.len(),
        earliest: earliest.map(|d| d.to_rfc3339()),
        latest: latest.map(|d| d.to_rfc3339()),
    }
}

fn summaries(commits: &[&StoredCommit]) -> Vec<CommitSummary> {
    commits.iter().map(|c| CommitSummary::from(&c.commit)).collect()
}

/// Builds the size-bounded payloads handed to the generation boundary
pub struct ContextAssembler<'a> {
    cfg: &'a ContextConfig,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(cfg: &'a ContextConfig) -> Self {
        Self { cfg }
    }

    /// Clips snapshot contents: key files first, each file to the excerpt
    /// limit, and the whole set to the snapshot budget.
    pub fn snapshot_payload(&self, snapshot: &Snapshot) -> SnapshotPayload {
        let ordered = snapshot.key_files.iter().chain(
            snapshot
                .files
                .keys()
                .filter(|p| !snapshot.key_files.contains(*p)),
        );

        let mut remaining = self.cfg.max_snapshot_chars;
        let mut files = Vec::new();
        for path in ordered {
            if remaining == 0 {
                break;
            }
            let Some(content) = snapshot.files.get(path) else {
                continue;
            };
            let limit = self.cfg.max_excerpt_chars.min(remaining);
            let clipped: String = content.chars().take(limit).collect();
            let used = clipped.chars().count();
            remaining -= used;
            files.push(FileExcerpt {
                path: path.clone(),
                truncated: used < content.chars().count(),
                content: clipped,
            });
        }

        SnapshotPayload {
            files,
            key_files: snapshot.key_files.clone(),
            total_lines: snapshot.total_lines,
        }
    }

    pub fn evolution(
        &self,
        repository: &Repository,
        commits: &[StoredCommit],
        changed_paths: Option<&HashMap<CommitId, Vec<String>>>,
        query: &EvolutionQuery,
        snapshot: &Snapshot,
    ) -> EvolutionContext {
        let filter = CommitFilter {
            file_path: query.file_path.as_deref(),
            date_range: query.date_range,
        };
        let candidates = candidate_commits(commits, &filter, changed_paths, self.cfg.query_commit_cap);
        let in_scope: Vec<_> = candidates
            .into_iter()
            .take(self.cfg.evolution_commits)
            .collect();

        EvolutionContext {
            question: query.question.clone(),
            file_path: query.file_path.clone(),
            date_range: query.date_range.map(|r| DateRangePayload {
                start: r.start.to_rfc3339(),
                end: r.end.to_rfc3339(),
            }),
            repository: repository_stats(repository, &in_scope),
            commits: summaries(&in_scope),
            snapshot: self.snapshot_payload(snapshot),
        }
    }

    pub fn pattern(
        &self,
        repository: &Repository,
        commits: &[StoredCommit],
        changed_paths: Option<&HashMap<CommitId, Vec<String>>>,
        file_path: Option<&str>,
        snapshot: &Snapshot,
    ) -> PatternContext {
        let filter = CommitFilter {
            file_path,
            date_range: None,
        };
        let candidates = candidate_commits(commits, &filter, changed_paths, self.cfg.query_commit_cap);
        let in_scope: Vec<_> = candidates
            .into_iter()
            .take(self.cfg.pattern_commits)
            .collect();

        PatternContext {
            file_path: file_path.map(String::from),
            repository: repository_stats(repository, &in_scope),
            commits: summaries(&in_scope),
            snapshot: self.snapshot_payload(snapshot),
        }
    }

    pub fn architecture(
        &self,
        repository: &Repository,
        commits: &[StoredCommit],
        snapshot: &Snapshot,
    ) -> ArchitectureContext {
        let candidates = candidate_commits(
            commits,
            &CommitFilter::default(),
            None,
            self.cfg.query_commit_cap,
        );
        let in_scope: Vec<_> = candidates
            .into_iter()
            .filter(|c| is_major_commit(&c.commit))
            .take(self.cfg.architecture_commits)
            .collect();

        ArchitectureContext {
            repository: repository_stats(repository, &in_scope),
            major_commits: summaries(&in_scope),
            snapshot: self.snapshot_payload(snapshot),
        }
    }
}

/// Serializes a payload into the document embedded in a prompt
pub fn render<T: Serialize>(payload: &T) -> Result<String> {
    let text = serde_json::to_string_pretty(payload)?;
    tracing::debug!(chars = text.len(), tokens = estimate_tokens(&text), "context rendered");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn repository() -> Repository {
        Repository {
            id: 1,
            name: "demo".into(),
            path: "/tmp/demo".into(),
            url: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_analyzed_at: None,
            total_commits: 0,
            total_files: 0,
            languages: BTreeSet::new(),
        }
    }

    fn stored(id: i64, month: u32, message: &str, files_changed: u32) -> StoredCommit {
        StoredCommit {
            id,
            repository_id: 1,
            commit: Commit {
                hash: format!("{id:02}aabbccddeeff"),
                author_name: "Linus".into(),
                author_email: "l@example.com".into(),
                date: Utc.with_ymd_and_hms(2023, month, 1, 0, 0, 0).unwrap(),
                message: message.into(),
                files_changed,
                insertions: 1,
                deletions: 0,
                parents: vec![],
            },
        }
    }

    /// Ten monthly commits, newest first
    fn monthly() -> Vec<StoredCommit> {
        (1..=10u32)
            .rev()
            .map(|m| stored(m as i64, m, &format!("month {m}"), 1))
            .collect()
    }

    #[test]
    fn date_range_keeps_inclusive_matches_in_order() {
        let cfg = ContextConfig::default();
        let assembler = ContextAssembler::new(&cfg);
        let query = EvolutionQuery {
            question: "What changed in spring?".into(),
            file_path: None,
            date_range: Some(DateRange::new(
                Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            )),
        };

        let ctx = assembler.evolution(&repository(), &monthly(), None, &query, &Snapshot::default());

        let messages: Vec<_> = ctx.commits.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["month 6", "month 5", "month 4", "month 3"]);
        assert_eq!(ctx.repository.commit_count, 4);
        assert_eq!(
            ctx.repository.earliest.as_deref(),
            Some("2023-03-01T00:00:00+00:00")
        );
    }

    #[test]
    fn cap_applies_after_filtering_and_drops_oldest() {
        let commits: Vec<_> = (0..150i64)
            .map(|i| {
                let mut c = stored(1000 - i, 1, &format!("c{i}"), 1);
                c.commit.date = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
                    - chrono::Duration::hours(i);
                c
            })
            .collect();

        let kept = candidate_commits(&commits, &CommitFilter::default(), None, 100);
        assert_eq!(kept.len(), 100);
        assert_eq!(kept[0].commit.message, "c0");
        assert_eq!(kept[99].commit.message, "c99");
    }

    #[test]
    fn file_filter_uses_changed_paths() {
        let commits = monthly();
        let mut paths = HashMap::new();
        paths.insert(10, vec!["src/api/routes.rs".to_string()]);
        paths.insert(4, vec!["src/api".to_string()]);
        paths.insert(2, vec!["src/apiary.rs".to_string()]);

        let filter = CommitFilter {
            file_path: Some("src/api"),
            date_range: None,
        };
        let kept: Vec<_> = candidate_commits(&commits, &filter, Some(&paths), 100)
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(kept, vec![10, 4]);
    }

    #[test]
    fn architecture_keeps_only_major_commits() {
        let cfg = ContextConfig::default();
        let assembler = ContextAssembler::new(&cfg);
        let commits = vec![
            stored(4, 4, "Refactor storage layer", 2),
            stored(3, 3, "fix typo", 1),
            stored(2, 2, "add feature", 9),
            stored(1, 1, "BREAKING: drop v1 api", 1),
        ];

        let ctx = assembler.architecture(&repository(), &commits, &Snapshot::default());
        let messages: Vec<_> = ctx.major_commits.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Refactor storage layer", "add feature", "BREAKING: drop v1 api"]
        );
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let cfg = ContextConfig::default();
        let assembler = ContextAssembler::new(&cfg);
        let ctx = assembler.pattern(&repository(), &[], None, None, &Snapshot::default());
        let json = serde_json::to_value(&ctx).unwrap();

        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("filePath"));
        assert!(!obj["repository"].as_object().unwrap().contains_key("earliest"));
        assert_eq!(obj["commits"], serde_json::json!([]));

        let evo = assembler.evolution(
            &repository(),
            &[],
            None,
            &EvolutionQuery {
                question: "why?".into(),
                ..Default::default()
            },
            &Snapshot::default(),
        );
        let json = serde_json::to_value(&evo).unwrap();
        assert!(json.get("dateRange").is_none());
        assert!(json.get("filePath").is_none());
        assert_eq!(json["question"], "why?");
    }

    #[test]
    fn summaries_use_short_hash() {
        let c = stored(7, 7, "tweak", 3);
        let summary = CommitSummary::from(&c.commit);
        assert_eq!(summary.hash, "07aabbcc");
        assert_eq!(summary.files_changed, 3);
    }

    #[test]
    fn snapshot_budget_prefers_key_files() {
        let cfg = ContextConfig {
            max_excerpt_chars: 5,
            max_snapshot_chars: 8,
            ..ContextConfig::default()
        };
        let assembler = ContextAssembler::new(&cfg);
        let mut snapshot = Snapshot::default();
        snapshot.files.insert("a.rs".into(), "aaaaaaaaaa".into());
        snapshot.files.insert("main.rs".into(), "mmmmmmmmmm".into());
        snapshot.key_files.push("main.rs".into());

        let payload = assembler.snapshot_payload(&snapshot);
        assert_eq!(payload.files.len(), 2);
        assert_eq!(payload.files[0].path, "main.rs");
        assert_eq!(payload.files[0].content, "mmmmm");
        assert!(payload.files[0].truncated);
        assert_eq!(payload.files[1].content, "aaa");
    }
}
