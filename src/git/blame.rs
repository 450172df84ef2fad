//! Line ownership replay.
//!
//! Walking HEAD's first-parent chain oldest-first and applying each commit's
//! added/deleted lines to a per-file list of owners yields, for every line of
//! the final tree, the commit that last added it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::git::diff::FileLineChanges;
use crate::models::{CommitLineChange, LineChangeKind, RepoSnapshot};
use crate::store::Store;

/// Owning commit of each line of one file. Index 0 is line 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBlame {
    lines: Vec<Arc<str>>,
}

impl FileBlame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn owner(&self, line_no: u32) -> Option<&str> {
        let idx = (line_no as usize).checked_sub(1)?;
        self.lines.get(idx).map(|sha| sha.as_ref())
    }

    /// Inserts `sha` so that it becomes line `line_no`. Positions past the end
    /// append.
    pub fn insert(&mut self, line_no: u32, sha: Arc<str>) {
        let idx = (line_no as usize).saturating_sub(1);
        if idx > self.lines.len() {
            debug!(
                "Insert at line {} past end ({} lines), appending",
                line_no,
                self.lines.len()
            );
        }
        let idx = idx.min(self.lines.len());
        self.lines.insert(idx, sha);
    }

    /// Removes line `line_no`, returning its previous owner.
    pub fn remove(&mut self, line_no: u32) -> Option<Arc<str>> {
        let idx = (line_no as usize).checked_sub(1)?;
        if idx >= self.lines.len() {
            debug!(
                "Delete of line {} out of range ({} lines), ignored",
                line_no,
                self.lines.len()
            );
            return None;
        }
        Some(self.lines.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|sha| sha.as_ref())
    }
}

fn line_id(n: Option<u32>) -> String {
    n.map(|n| n.to_string()).unwrap_or_else(|| "-1".to_string())
}

/// Replays commits into per-file blame state and writes the final snapshot.
#[derive(Debug)]
pub struct SnapshotBuilder {
    repo_id: String,
    files: BTreeMap<String, FileBlame>,
}

impl SnapshotBuilder {
    pub fn new(repo_id: &str) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            files: BTreeMap::new(),
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileBlame> {
        self.files.get(path)
    }

    /// Applies one commit's line changes and emits a CommitLineChange for
    /// each of them.
    ///
    /// Within a file, deletions go first in descending old line order, then
    /// additions in ascending new line order.
    pub fn apply(
        &mut self,
        commit_sha: &str,
        changes: &[FileLineChanges],
        store: &mut dyn Store,
    ) -> Result<()> {
        let sha: Arc<str> = Arc::from(commit_sha);

        for file in changes {
            let path = file.path();
            if path.is_empty() {
                continue;
            }
            let old_path = file.old_path.as_deref().unwrap_or(path);
            let new_path = file.new_path.as_deref().unwrap_or(path);
            let blame = self.files.entry(path.to_string()).or_default();

            let mut deleted: Vec<_> = file
                .lines
                .iter()
                .filter(|l| l.kind == LineChangeKind::Deleted)
                .collect();
            deleted.sort_by(|a, b| b.old_lineno.cmp(&a.old_lineno));

            let mut added: Vec<_> = file
                .lines
                .iter()
                .filter(|l| l.kind == LineChangeKind::Added)
                .collect();
            added.sort_by_key(|l| l.new_lineno);

            for line in deleted.into_iter().chain(added) {
                let prev_commit = match (line.kind, line.old_lineno, line.new_lineno) {
                    (LineChangeKind::Deleted, Some(n), _) => blame.remove(n),
                    (LineChangeKind::Added, _, Some(n)) => {
                        blame.insert(n, sha.clone());
                        None
                    }
                    _ => continue,
                };
                store.commit_line_change(&CommitLineChange {
                    id: format!(
                        "{}:{}:{}:{}",
                        commit_sha,
                        new_path,
                        line_id(line.old_lineno),
                        line_id(line.new_lineno)
                    ),
                    commit_sha: commit_sha.to_string(),
                    old_file_path: old_path.to_string(),
                    new_file_path: new_path.to_string(),
                    line_no_old: line.old_lineno,
                    line_no_new: line.new_lineno,
                    changed_type: line.kind,
                    hunk_num: line.hunk,
                    prev_commit: prev_commit.map(|p| p.to_string()).unwrap_or_default(),
                })?;
            }
        }
        Ok(())
    }

    /// Replaces the repository's snapshot rows with the replayed state.
    /// Returns the number of rows written.
    pub fn finish(self, store: &mut dyn Store) -> Result<usize> {
        store.clear_repo_snapshot(&self.repo_id)?;
        let mut rows = 0;
        for (path, blame) in &self.files {
            for (idx, sha) in blame.iter().enumerate() {
                store.repo_snapshot(&RepoSnapshot {
                    repo_id: self.repo_id.clone(),
                    file_path: path.clone(),
                    line_no: idx as u32 + 1,
                    commit_sha: sha.to_string(),
                })?;
                rows += 1;
            }
        }
        debug!("Snapshot of {} has {} lines in {} files", self.repo_id, rows, self.files.len());
        Ok(rows)
    }
}
