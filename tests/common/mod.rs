// tests/common/mod.rs

#![allow(dead_code)]

use git2::{IndexAddOption, Oid, Repository, Signature, Time};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A throwaway git repository with a working tree
pub struct TestRepo {
    pub dir: TempDir,
    pub repo: Repository,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) {
        let full = self.dir.path().join(relative);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.dir.path().join(relative)).unwrap();
    }

    pub fn rename(&self, from: &str, to: &str) {
        fs::rename(self.dir.path().join(from), self.dir.path().join(to)).unwrap();
    }

    fn stage_all(&self) -> Oid {
        let mut index = self.repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.update_all(["*"].iter(), None).unwrap();
        index.write().unwrap();
        index.write_tree().unwrap()
    }

    /// Commits the whole working tree onto HEAD at `time` (seconds since epoch).
    pub fn commit(&self, message: &str, time: i64) -> Oid {
        let tree_id = self.stage_all();
        let tree = self.repo.find_tree(tree_id).unwrap();
        let sig = Signature::new("Tess Ter", "tess@example.com", &Time::new(time, 0)).unwrap();
        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .map(|oid| self.repo.find_commit(oid).unwrap());
        let parents: Vec<_> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    /// Commits the current tree onto `branch`, parented on `parent`, without moving HEAD.
    pub fn commit_on_branch(&self, branch: &str, parent: Oid, message: &str, time: i64) -> Oid {
        let tree_id = self.stage_all();
        let tree = self.repo.find_tree(tree_id).unwrap();
        let sig = Signature::new("Bran Ch", "branch@example.com", &Time::new(time, 0)).unwrap();
        let parent = self.repo.find_commit(parent).unwrap();
        let reference = format!("refs/heads/{branch}");
        self.repo
            .commit(
                Some(reference.as_str()),
                &sig,
                &sig,
                message,
                &tree,
                &[&parent],
            )
            .unwrap()
    }
}
