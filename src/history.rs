// src/history.rs

use crate::error::{HistorianError, Result};
use crate::languages;
use crate::model::*;
use crate::store::Store;
use chrono::{TimeZone, Utc};
use git2::{Delta, DiffFindOptions, DiffOptions, Oid, Patch, Repository, Sort};
use indicatif::ProgressBar;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

/// Author recorded when a location has no readable history
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// A commit exactly as read from the object database, before normalisation
#[derive(Debug, Clone, PartialEq)]
pub struct RawCommit {
    pub hash: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub time: i64,
    pub message: Option<String>,
    pub parent_hashes: Vec<String>,
}

/// One entry of a tree-to-tree diff with its line stats
#[derive(Debug, Clone, PartialEq)]
pub struct RawDelta {
    /// Single-letter status as printed by `git diff --name-status`
    pub status: char,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub insertions: usize,
    pub deletions: usize,
    /// Binary deltas carry no numeric stats
    pub binary: bool,
}

/// Diff of a commit against its first parent (or the empty tree)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDiff {
    pub deltas: Vec<RawDelta>,
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

fn clamp_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl RawCommit {
    fn to_commit(&self, diff: &RawDiff) -> Commit {
        Commit {
            hash: self.hash.clone(),
            author_name: self
                .author_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            author_email: self.author_email.clone().unwrap_or_default(),
            date: Utc.timestamp_opt(self.time, 0).single().unwrap_or_default(),
            message: self
                .message
                .as_deref()
                .unwrap_or_default()
                .trim_end()
                .to_string(),
            files_changed: clamp_u32(diff.files_changed),
            insertions: clamp_u32(diff.insertions),
            deletions: clamp_u32(diff.deletions),
            parents: self.parent_hashes.clone(),
        }
    }
}

impl RawDelta {
    /// Normalises into a `FileChange`; entries without any path are dropped.
    ///
    /// A rename whose old side has no path is recorded as a modification, so
    /// every renamed change carries a previous path.
    fn into_file_change(self) -> Option<FileChange> {
        let mut kind = ChangeKind::from_status_code(self.status);
        let path = match kind {
            ChangeKind::Deleted => self.old_path.clone().or_else(|| self.new_path.clone()),
            _ => self.new_path.clone().or_else(|| self.old_path.clone()),
        }?;

        let previous_path = match kind {
            ChangeKind::Renamed => self.old_path.filter(|p| !p.is_empty()),
            _ => None,
        };
        if kind == ChangeKind::Renamed && previous_path.is_none() {
            kind = ChangeKind::Modified;
        }

        let (insertions, deletions) = if self.binary {
            (0, 0)
        } else {
            (clamp_u32(self.insertions), clamp_u32(self.deletions))
        };

        Some(FileChange {
            path,
            kind,
            insertions,
            deletions,
            previous_path,
        })
    }
}

/// Where commit history comes from
pub trait HistorySource {
    /// Up to `max` commits, newest first. Never fails; unreadable history is empty.
    fn commits(&self, max: usize) -> Vec<RawCommit>;

    /// Diff of one commit against its first parent.
    fn diff(&self, commit: &RawCommit) -> Result<RawDiff>;
}

/// History read from a git repository on disk
pub struct GitHistory {
    repo: Repository,
}

fn status_code(status: Delta) -> char {
    match status {
        Delta::Added => 'A',
        Delta::Deleted => 'D',
        Delta::Modified => 'M',
        Delta::Renamed => 'R',
        Delta::Copied => 'C',
        Delta::Typechange => 'T',
        Delta::Untracked => '?',
        Delta::Conflicted => 'U',
        _ => 'X',
    }
}

impl GitHistory {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open(path).map_err(|e| {
            HistorianError::git_with_source(format!("cannot open {}", path.display()), e)
        })?;
        Ok(Self { repo })
    }

    fn walk(&self, max: usize) -> std::result::Result<Vec<RawCommit>, git2::Error> {
        let mut revwalk = self.repo.revwalk()?;
        // HEAD is unborn in a repository without commits
        if self.repo.head().is_ok() {
            revwalk.push_head()?;
        }
        revwalk.push_glob("refs/heads/*")?;
        revwalk.set_sorting(Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            if commits.len() >= max {
                break;
            }
            let oid = match oid {
                Ok(oid) => oid,
                Err(e) => {
                    tracing::warn!(error = %e, "revision walk stopped early");
                    break;
                }
            };
            let commit = match self.repo.find_commit(oid) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(hash = %oid, error = %e, "unreadable commit skipped");
                    continue;
                }
            };

            let author = commit.author();
            commits.push(RawCommit {
                hash: oid.to_string(),
                author_name: author.name().map(String::from),
                author_email: author.email().map(String::from),
                time: commit.time().seconds(),
                message: commit.message().map(String::from),
                parent_hashes: commit.parent_ids().map(|p| p.to_string()).collect(),
            });
        }
        Ok(commits)
    }

    fn diff_commit(&self, raw: &RawCommit) -> std::result::Result<RawDiff, git2::Error> {
        let commit = self.repo.find_commit(Oid::from_str(&raw.hash)?)?;
        let current_tree = commit.tree()?;
        // Root commits diff against the empty tree
        let parent_tree = if commit.parent_count() > 0 {
            Some(commit.parent(0)?.tree()?)
        } else {
            None
        };

        let mut diff_opts = DiffOptions::new();
        diff_opts.include_untracked(false);
        diff_opts.ignore_filemode(true);

        let mut diff = self.repo.diff_tree_to_tree(
            parent_tree.as_ref(),
            Some(&current_tree),
            Some(&mut diff_opts),
        )?;
        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        let stats = diff.stats()?;
        let mut deltas = Vec::with_capacity(diff.deltas().len());
        for (idx, delta) in diff.deltas().enumerate() {
            let (insertions, deletions, binary) = match Patch::from_diff(&diff, idx)? {
                Some(patch) if !delta.flags().is_binary() => {
                    let (_, additions, removals) = patch.line_stats()?;
                    (additions, removals, false)
                }
                _ => (0, 0, true),
            };

            deltas.push(RawDelta {
                status: status_code(delta.status()),
                old_path: delta
                    .old_file()
                    .path()
                    .map(|p| p.to_string_lossy().into_owned()),
                new_path: delta
                    .new_file()
                    .path()
                    .map(|p| p.to_string_lossy().into_owned()),
                insertions,
                deletions,
                binary,
            });
        }

        Ok(RawDiff {
            deltas,
            files_changed: stats.files_changed(),
            insertions: stats.insertions(),
            deletions: stats.deletions(),
        })
    }
}

impl HistorySource for GitHistory {
    fn commits(&self, max: usize) -> Vec<RawCommit> {
        self.walk(max).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cannot walk history, treating it as empty");
            Vec::new()
        })
    }

    fn diff(&self, commit: &RawCommit) -> Result<RawDiff> {
        self.diff_commit(commit).map_err(|e| {
            HistorianError::git_with_source(format!("diff failed for {}", commit.hash), e)
        })
    }
}

/// Every commit reachable from HEAD and local branches, newest first.
///
/// A location that is not a repository yields an empty list.
pub fn list_all_commits(path: &Path) -> Vec<RawCommit> {
    match GitHistory::open(path) {
        Ok(history) => history.commits(usize::MAX),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "not a repository");
            Vec::new()
        }
    }
}

/// Distinct author names; a non-repository yields just the sentinel author.
pub fn collect_authors(path: &Path) -> BTreeSet<String> {
    match GitHistory::open(path) {
        Ok(history) => history
            .commits(usize::MAX)
            .into_iter()
            .map(|c| c.author_name.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()))
            .collect(),
        Err(_) => [UNKNOWN_AUTHOR.to_string()].into_iter().collect(),
    }
}

/// Relative paths of tracked files.
///
/// Uses the git index when the location is a repository, otherwise walks
/// the directory skipping hidden entries.
pub fn tracked_files(path: &Path) -> Vec<String> {
    if let Ok(repo) = Repository::open(path) {
        if let Ok(index) = repo.index() {
            return index
                .iter()
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
                .collect();
        }
    }

    WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(path)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

pub fn detect_repository_languages(path: &Path) -> BTreeSet<String> {
    languages::detect_languages(tracked_files(path))
}

/// A commit left out of an extraction pass, and why
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCommit {
    pub hash: String,
    pub reason: String,
}

/// Outcome of one extraction pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    pub processed: usize,
    pub file_changes: usize,
    pub skipped: Vec<SkippedCommit>,
}

/// Walks up to `max_commits` commits from `source`, newest first, and stores
/// each one with its file changes.
///
/// A commit whose diff or write fails is logged and skipped; the walk always
/// continues. Finishes by refreshing the repository's commit counter.
pub fn process_commit_history<S: HistorySource + ?Sized>(
    store: &Store,
    repository_id: RepositoryId,
    source: &S,
    max_commits: usize,
    bar: &ProgressBar,
) -> Result<ExtractionReport> {
    store.require_repository(repository_id)?;

    let commits = source.commits(max_commits);
    bar.set_length(commits.len() as u64);
    bar.set_message("Extracting history");

    let mut report = ExtractionReport::default();
    for raw in &commits {
        let diff = match source.diff(raw) {
            Ok(diff) => diff,
            Err(e) => {
                tracing::warn!(repository_id, hash = %raw.hash, error = %e, "skipping commit");
                report.skipped.push(SkippedCommit {
                    hash: raw.hash.clone(),
                    reason: e.to_string(),
                });
                bar.inc(1);
                continue;
            }
        };

        let commit = raw.to_commit(&diff);
        let changes: Vec<FileChange> = diff
            .deltas
            .into_iter()
            .filter_map(RawDelta::into_file_change)
            .collect();

        match store.record_commit(repository_id, &commit, &changes) {
            Ok(_) => {
                tracing::debug!(hash = %commit.short_hash(), files = changes.len(), "commit stored");
                report.processed += 1;
                report.file_changes += changes.len();
            }
            Err(e) => {
                tracing::warn!(repository_id, hash = %raw.hash, error = %e, "commit not stored");
                report.skipped.push(SkippedCommit {
                    hash: raw.hash.clone(),
                    reason: e.to_string(),
                });
            }
        }
        bar.inc(1);
    }
    bar.finish_with_message("History extracted");

    store.finish_ingestion(repository_id, Utc::now())?;
    tracing::info!(
        repository_id,
        processed = report.processed,
        skipped = report.skipped.len(),
        file_changes = report.file_changes,
        "history extraction complete"
    );
    Ok(report)
}

/// Extracts history for a stored repository from its filesystem location.
pub fn ingest_history(
    store: &Store,
    repository_id: RepositoryId,
    max_commits: usize,
    bar: &ProgressBar,
) -> Result<ExtractionReport> {
    let repository = store.require_repository(repository_id)?;
    match GitHistory::open(Path::new(&repository.path)) {
        Ok(history) => process_commit_history(store, repository_id, &history, max_commits, bar),
        Err(e) => {
            tracing::warn!(repository_id, error = %e, "no readable history, recording empty ingestion");
            store.finish_ingestion(repository_id, Utc::now())?;
            Ok(ExtractionReport::default())
        }
    }
}
