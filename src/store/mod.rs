// src/store/mod.rs

mod schema;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{HistorianError, Result};
use crate::model::*;

/// SQLite-backed store for repositories, commits, file changes and analyses.
///
/// Opened once at startup and shared by handle; all access is serialized
/// through a single connection.
pub struct Store {
    conn: Mutex<Connection>,
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

const REPOSITORY_COLUMNS: &str = "id, name, path, url, created_at, last_analyzed_at, \
     total_commits, total_files, languages";

const COMMIT_COLUMNS: &str = "id, repository_id, hash, author_name, author_email, committed_at, \
     message, files_changed, insertions, deletions, parents";

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let languages: String = row.get(8)?;
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        url: row.get(3)?,
        created_at: from_unix(row.get(4)?),
        last_analyzed_at: row.get::<_, Option<i64>>(5)?.map(from_unix),
        total_commits: row.get::<_, i64>(6)?.max(0) as u64,
        total_files: row.get::<_, i64>(7)?.max(0) as u64,
        languages: serde_json::from_str::<BTreeSet<String>>(&languages).unwrap_or_default(),
    })
}

fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<StoredCommit> {
    let parents: String = row.get(10)?;
    Ok(StoredCommit {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        commit: Commit {
            hash: row.get(2)?,
            author_name: row.get(3)?,
            author_email: row.get(4)?,
            date: from_unix(row.get(5)?),
            message: row.get(6)?,
            files_changed: row.get(7)?,
            insertions: row.get(8)?,
            deletions: row.get(9)?,
            parents: serde_json::from_str(&parents).unwrap_or_default(),
        },
    })
}

impl Store {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                HistorianError::io_with_source(
                    format!("failed to create db directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            HistorianError::storage_with_source(format!("failed to open db at {}", path.display()), e)
        })?;
        schema::migrate(&conn)?;

        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HistorianError::storage_with_source("failed to open in-memory db", e))?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| HistorianError::storage("connection lock poisoned"))?;
        f(&mut guard)
    }

    // ─── repositories ───────────────────────────────────────────────────────

    pub fn create_repository(&self, new: &NewRepository) -> Result<Repository> {
        let languages = serde_json::to_string(&new.languages)?;
        let now = Utc::now().timestamp();
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO repositories (name, path, url, created_at, total_files, languages)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![new.name, new.path, new.url, now, new.total_files as i64, languages],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        self.require_repository(id)
    }

    pub fn get_repository(&self, id: RepositoryId) -> Result<Option<Repository>> {
        self.with_conn(|conn| {
            let repo = conn
                .query_row(
                    &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
                    params![id],
                    repository_from_row,
                )
                .optional()?;
            Ok(repo)
        })
    }

    /// Like `get_repository`, but a missing row is a `NotFound` error.
    pub fn require_repository(&self, id: RepositoryId) -> Result<Repository> {
        self.get_repository(id)?
            .ok_or_else(|| HistorianError::not_found(id))
    }

    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories ORDER BY id"
            ))?;
            let rows = stmt.query_map([], repository_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Sets `total_commits` from the stored rows and stamps `last_analyzed_at`.
    pub fn finish_ingestion(
        &self,
        id: RepositoryId,
        analyzed_at: DateTime<Utc>,
    ) -> Result<Repository> {
        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE repositories SET
                    total_commits = (SELECT COUNT(*) FROM commits WHERE repository_id = ?1),
                    last_analyzed_at = ?2
                 WHERE id = ?1",
                params![id, analyzed_at.timestamp()],
            )?)
        })?;
        if updated == 0 {
            return Err(HistorianError::not_found(id));
        }
        self.require_repository(id)
    }

    // ─── commits ────────────────────────────────────────────────────────────

    /// Upserts a commit by (repository, hash) and replaces its file changes.
    ///
    /// Runs in one transaction, so a re-ingested commit never ends up with
    /// duplicated or half-written file changes.
    pub fn record_commit(
        &self,
        repository_id: RepositoryId,
        commit: &Commit,
        changes: &[FileChange],
    ) -> Result<CommitId> {
        let parents = serde_json::to_string(&commit.parents)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO commits (repository_id, hash, author_name, author_email, committed_at,
                                      message, files_changed, insertions, deletions, parents)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(repository_id, hash) DO UPDATE SET
                    author_name = excluded.author_name,
                    author_email = excluded.author_email,
                    committed_at = excluded.committed_at,
                    message = excluded.message,
                    files_changed = excluded.files_changed,
                    insertions = excluded.insertions,
                    deletions = excluded.deletions,
                    parents = excluded.parents",
                params![
                    repository_id,
                    commit.hash,
                    commit.author_name,
                    commit.author_email,
                    commit.date.timestamp(),
                    commit.message,
                    commit.files_changed,
                    commit.insertions,
                    commit.deletions,
                    parents,
                ],
            )?;
            let commit_id: CommitId = tx.query_row(
                "SELECT id FROM commits WHERE repository_id = ?1 AND hash = ?2",
                params![repository_id, commit.hash],
                |row| row.get(0),
            )?;

            tx.execute(
                "DELETE FROM file_changes WHERE commit_id = ?1",
                params![commit_id],
            )?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO file_changes (commit_id, path, kind, insertions, deletions, previous_path)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for change in changes {
                    stmt.execute(params![
                        commit_id,
                        change.path,
                        change.kind.as_str(),
                        change.insertions,
                        change.deletions,
                        change.previous_path,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(commit_id)
        })
    }

    /// All commits of a repository, newest first.
    pub fn list_commits(&self, repository_id: RepositoryId) -> Result<Vec<StoredCommit>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COMMIT_COLUMNS} FROM commits
                 WHERE repository_id = ?1
                 ORDER BY committed_at DESC, id ASC"
            ))?;
            let rows = stmt.query_map(params![repository_id], commit_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn find_commit(
        &self,
        repository_id: RepositoryId,
        hash: &str,
    ) -> Result<Option<StoredCommit>> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    &format!(
                        "SELECT {COMMIT_COLUMNS} FROM commits WHERE repository_id = ?1 AND hash = ?2"
                    ),
                    params![repository_id, hash],
                    commit_from_row,
                )
                .optional()?;
            Ok(found)
        })
    }

    pub fn commit_count(&self, repository_id: RepositoryId) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM commits WHERE repository_id = ?1",
                params![repository_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    // ─── file changes ───────────────────────────────────────────────────────

    pub fn file_changes(&self, commit_id: CommitId) -> Result<Vec<FileChange>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT path, kind, insertions, deletions, previous_path
                 FROM file_changes WHERE commit_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![commit_id], |row| {
                let kind: String = row.get(1)?;
                Ok(FileChange {
                    path: row.get(0)?,
                    kind: ChangeKind::parse(&kind).unwrap_or(ChangeKind::Modified),
                    insertions: row.get(2)?,
                    deletions: row.get(3)?,
                    previous_path: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Changed paths per commit for one repository, used for path scoping.
    pub fn changed_paths(
        &self,
        repository_id: RepositoryId,
    ) -> Result<HashMap<CommitId, Vec<String>>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT fc.commit_id, fc.path
                 FROM file_changes fc JOIN commits c ON c.id = fc.commit_id
                 WHERE c.repository_id = ?1",
            )?;
            let rows = stmt.query_map(params![repository_id], |row| {
                Ok((row.get::<_, CommitId>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut paths: HashMap<CommitId, Vec<String>> = HashMap::new();
            for row in rows {
                let (commit_id, path) = row?;
                paths.entry(commit_id).or_default().push(path);
            }
            Ok(paths)
        })
    }

    // ─── analyses ───────────────────────────────────────────────────────────

    pub fn insert_analysis(&self, new: &NewAnalysis) -> Result<Analysis> {
        let result = serde_json::to_string(&new.result)?;
        let created_at = Utc::now();
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO analyses (repository_id, commit_id, file_path, kind, result, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.repository_id,
                    new.commit_id,
                    new.file_path,
                    new.kind.as_str(),
                    result,
                    created_at.timestamp(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(Analysis {
            id,
            repository_id: new.repository_id,
            commit_id: new.commit_id,
            file_path: new.file_path.clone(),
            kind: new.kind,
            result: new.result.clone(),
            created_at: from_unix(created_at.timestamp()),
        })
    }

    /// Analysis history for a repository, oldest first.
    pub fn list_analyses(&self, repository_id: RepositoryId) -> Result<Vec<Analysis>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, repository_id, commit_id, file_path, kind, result, created_at
                 FROM analyses WHERE repository_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![repository_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, RepositoryId>(1)?,
                    row.get::<_, Option<CommitId>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        raw.into_iter()
            .map(|(id, repository_id, commit_id, file_path, kind, result, created_at)| {
                let kind = AnalysisKind::parse(&kind).ok_or_else(|| {
                    HistorianError::storage(format!("unknown analysis kind '{kind}'"))
                })?;
                Ok(Analysis {
                    id,
                    repository_id,
                    commit_id,
                    file_path,
                    kind,
                    result: serde_json::from_str(&result)?,
                    created_at: from_unix(created_at),
                })
            })
            .collect()
    }
}
