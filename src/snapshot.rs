// src/snapshot.rs

use crate::config::SnapshotConfig;
use crate::history;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Path fragments that mark dependency caches, build output and VCS internals
const EXCLUDED_FRAGMENTS: &[&str] = &[
    "node_modules/",
    ".git/",
    "dist/",
    "build/",
    "target/",
    "vendor/",
    "out/",
    ".next/",
    ".nuxt/",
    "coverage/",
    "__pycache__/",
    ".venv/",
    "venv/",
    ".idea/",
    ".vscode/",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "mjs", "ts", "tsx", "py", "rb", "go", "rs", "java", "kt", "scala", "swift", "c",
    "h", "cpp", "cc", "hpp", "cs", "php", "dart", "lua", "ex", "exs", "vue", "svelte", "html",
    "css", "scss", "json", "yaml", "yml", "toml", "xml", "md", "sql", "sh", "graphql", "proto",
];

const WELL_KNOWN_FILES: &[&str] = &[
    "readme",
    "dockerfile",
    "makefile",
    "license",
    "package.json",
    "cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "requirements.txt",
    "pyproject.toml",
    "gemfile",
];

/// Basename fragments that make a file a key file
const KEY_FILE_KEYWORDS: &[&str] = &[
    "readme",
    "index",
    "main",
    "app",
    "server",
    "client",
    "config",
    "setup",
    "init",
    "bootstrap",
    "package.json",
    "cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "makefile",
    "dockerfile",
    "requirements.txt",
    "pyproject.toml",
];

/// A best-effort sample of a repository's current files
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Relative path to file content
    pub files: BTreeMap<String, String>,
    /// Paths in `files` that are key files, in selection order
    pub key_files: Vec<String>,
    pub total_lines: usize,
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase()
}

fn is_excluded(path: &str) -> bool {
    let normalized = format!("/{path}");
    EXCLUDED_FRAGMENTS
        .iter()
        .any(|fragment| normalized.contains(&format!("/{fragment}")))
}

fn is_eligible(path: &str) -> bool {
    if is_excluded(path) {
        return false;
    }
    let name = basename(path);
    if WELL_KNOWN_FILES
        .iter()
        .any(|known| name == *known || name.starts_with(&format!("{known}.")))
    {
        return true;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) => SOURCE_EXTENSIONS.contains(&ext),
        None => false,
    }
}

pub fn is_key_file(path: &str) -> bool {
    let name = basename(path);
    KEY_FILE_KEYWORDS.iter().any(|kw| name.contains(kw))
}

/// True when control characters make up more than `threshold` of the bytes.
pub fn looks_binary(bytes: &[u8], threshold: f64) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let control = bytes
        .iter()
        .filter(|&&b| matches!(b, 0x00..=0x08 | 0x0E..=0x1F | 0x7F))
        .count();
    control as f64 / bytes.len() as f64 > threshold
}

/// Eligible paths ordered key files first, capped at `max_files`.
///
/// Relative order inside each group follows the input order.
pub fn select_files<I, S>(paths: I, max_files: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let (key, rest): (Vec<String>, Vec<String>) = paths
        .into_iter()
        .map(Into::into)
        .filter(|p: &String| is_eligible(p))
        .partition(|p| is_key_file(p));

    key.into_iter().chain(rest).take(max_files).collect()
}

fn read_text(root: &Path, relative: &str, cfg: &SnapshotConfig) -> Option<String> {
    let bytes = match std::fs::read(root.join(relative)) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = relative, error = %e, "snapshot file unreadable");
            return None;
        }
    };
    if looks_binary(&bytes, cfg.binary_threshold) {
        tracing::debug!(path = relative, "snapshot skipped binary file");
        return None;
    }
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.chars().count() > cfg.max_file_chars {
        tracing::debug!(path = relative, "snapshot skipped oversized file");
        return None;
    }
    Some(text)
}

/// Reads a bounded, key-files-first sample of the files under `root`.
///
/// Unreadable, binary and oversized files are omitted.
pub fn collect_snapshot(root: &Path, cfg: &SnapshotConfig) -> Snapshot {
    let selected = select_files(history::tracked_files(root), cfg.max_files);

    let contents: Vec<(String, String)> = selected
        .par_iter()
        .filter_map(|path| read_text(root, path, cfg).map(|text| (path.clone(), text)))
        .collect();

    let total_lines = contents.iter().map(|(_, text)| text.lines().count()).sum();
    let files: BTreeMap<String, String> = contents.into_iter().collect();
    let key_files = selected
        .iter()
        .filter(|p| files.contains_key(*p) && is_key_file(p))
        .cloned()
        .collect();

    tracing::debug!(
        root = %root.display(),
        selected = selected.len(),
        included = files.len(),
        total_lines,
        "snapshot collected"
    );

    Snapshot {
        files,
        key_files,
        total_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn excluded_directories_are_dropped() {
        assert!(!is_eligible("node_modules/left-pad/index.js"));
        assert!(!is_eligible("web/dist/app.js"));
        assert!(!is_eligible("target/debug/build.rs"));
        assert!(is_eligible("src/distance.rs"));
    }

    #[test]
    fn well_known_basenames_are_eligible() {
        assert!(is_eligible("README"));
        assert!(is_eligible("Dockerfile"));
        assert!(is_eligible("docs/README.rst"));
        assert!(!is_eligible("assets/logo.png"));
    }

    #[test]
    fn key_files_come_first_and_cap_holds() {
        let mut paths: Vec<String> = (0..500).map(|i| format!("src/module_{i:03}.rs")).collect();
        paths.push("src/main.rs".into());
        paths.push("README.md".into());
        paths.push("src/config/settings.rs".into());

        let selected = select_files(paths, 50);

        assert_eq!(selected.len(), 50);
        assert_eq!(&selected[..2], &["src/main.rs".to_string(), "README.md".to_string()]);
        assert!(selected[2..].iter().all(|p| !is_key_file(p)));
    }

    #[test]
    fn control_character_density_marks_binary() {
        assert!(!looks_binary(b"fn main() {\n\tprintln!(\"hi\");\r\n}\n", 0.1));
        assert!(looks_binary(&[0u8, 1, 2, 3, b'a', b'b'], 0.1));
        assert!(!looks_binary(b"", 0.1));
    }

    #[test]
    fn collects_text_and_skips_binary_and_large() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("README.md"), "# Demo\nline two\n").unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        fs::write(dir.path().join("src/blob.rs"), [0u8; 64]).unwrap();
        fs::write(dir.path().join("src/huge.rs"), "x".repeat(200)).unwrap();

        let cfg = SnapshotConfig {
            max_files: 50,
            max_file_chars: 100,
            binary_threshold: 0.1,
        };
        let snapshot = collect_snapshot(dir.path(), &cfg);

        let paths: Vec<_> = snapshot.files.keys().cloned().collect();
        assert_eq!(paths, vec!["README.md".to_string(), "src/lib.rs".to_string()]);
        assert_eq!(snapshot.key_files, vec!["README.md".to_string()]);
        assert_eq!(snapshot.total_lines, 3);
    }
}
