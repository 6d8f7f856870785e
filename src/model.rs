// src/model.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Row id of a stored repository
pub type RepositoryId = i64;

/// Row id of a stored commit
pub type CommitId = i64;

/// An ingested repository and its aggregate counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub path: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Unset until a full history pass completes
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub total_commits: u64,
    pub total_files: u64,
    pub languages: BTreeSet<String>,
}

/// Fields supplied when a repository is first registered
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub name: String,
    pub path: String,
    pub url: Option<String>,
    pub total_files: u64,
    pub languages: BTreeSet<String>,
}

/// A commit as stored, keyed by (repository, hash)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Commit {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
    /// Parent hashes in git order; first parent first
    pub parents: Vec<String>,
}

impl Commit {
    /// First eight characters of the hash, as used in prompts and answers
    pub fn short_hash(&self) -> &str {
        let end = self.hash.char_indices().nth(8).map_or(self.hash.len(), |(i, _)| i);
        &self.hash[..end]
    }
}

/// A stored commit together with its row id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCommit {
    pub id: CommitId,
    pub repository_id: RepositoryId,
    pub commit: Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    /// Maps a diff status letter to a change kind; anything unrecognised is a modification
    pub fn from_status_code(code: char) -> Self {
        match code {
            'A' => Self::Added,
            'M' => Self::Modified,
            'D' => Self::Deleted,
            'R' => Self::Renamed,
            _ => Self::Modified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "deleted" => Some(Self::Deleted),
            "renamed" => Some(Self::Renamed),
            _ => None,
        }
    }
}

/// A single file's delta within one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub insertions: u32,
    pub deletions: u32,
    /// Only present for renames, and never empty there
    pub previous_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Pattern,
    Complexity,
    Ownership,
    Evolution,
    Architecture,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Complexity => "complexity",
            Self::Ownership => "ownership",
            Self::Evolution => "evolution",
            Self::Architecture => "architecture",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pattern" => Some(Self::Pattern),
            "complexity" => Some(Self::Complexity),
            "ownership" => Some(Self::Ownership),
            "evolution" => Some(Self::Evolution),
            "architecture" => Some(Self::Architecture),
            _ => None,
        }
    }
}

/// An append-only analysis record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub id: i64,
    pub repository_id: RepositoryId,
    pub commit_id: Option<CommitId>,
    pub file_path: Option<String>,
    pub kind: AnalysisKind,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub repository_id: RepositoryId,
    pub commit_id: Option<CommitId>,
    pub file_path: Option<String>,
    pub kind: AnalysisKind,
    pub result: serde_json::Value,
}

/// Inclusive bounds on commit date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        date >= self.start && date <= self.end
    }
}
