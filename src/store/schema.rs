// src/store/schema.rs

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{HistorianError, Result};

/// V1: repositories, commits, file changes, analyses.
const V1_INITIAL: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    url TEXT,
    created_at INTEGER NOT NULL,
    last_analyzed_at INTEGER,
    total_commits INTEGER NOT NULL DEFAULT 0,
    total_files INTEGER NOT NULL DEFAULT 0,
    languages TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS commits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    hash TEXT NOT NULL,
    author_name TEXT NOT NULL,
    author_email TEXT NOT NULL,
    committed_at INTEGER NOT NULL,
    message TEXT NOT NULL,
    files_changed INTEGER NOT NULL DEFAULT 0,
    insertions INTEGER NOT NULL DEFAULT 0,
    deletions INTEGER NOT NULL DEFAULT 0,
    parents TEXT NOT NULL DEFAULT '[]',
    UNIQUE(repository_id, hash)
);

CREATE INDEX IF NOT EXISTS idx_commits_repo_date
    ON commits(repository_id, committed_at DESC);

CREATE TABLE IF NOT EXISTS file_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_id INTEGER NOT NULL REFERENCES commits(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('added', 'modified', 'deleted', 'renamed')),
    insertions INTEGER NOT NULL DEFAULT 0 CHECK (insertions >= 0),
    deletions INTEGER NOT NULL DEFAULT 0 CHECK (deletions >= 0),
    previous_path TEXT,
    CHECK (kind != 'renamed' OR (previous_path IS NOT NULL AND previous_path != ''))
);

CREATE INDEX IF NOT EXISTS idx_file_changes_commit ON file_changes(commit_id);
CREATE INDEX IF NOT EXISTS idx_file_changes_path ON file_changes(path);

-- Append-only: every analysis run adds a row.
CREATE TABLE IF NOT EXISTS analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    commit_id INTEGER REFERENCES commits(id) ON DELETE SET NULL,
    file_path TEXT,
    kind TEXT NOT NULL,
    result TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analyses_repo ON analyses(repository_id, created_at);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Applies pragmas and any migrations newer than the recorded schema version.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let current: i64 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        conn.execute_batch(sql).map_err(|e| {
            HistorianError::storage_with_source(format!("migration v{version} failed"), e)
        })?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![version],
        )?;
        tracing::debug!(version, "applied schema migration");
    }

    Ok(())
}
