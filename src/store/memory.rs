use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{
    Commit, CommitFile, CommitFileComponent, CommitLineChange, CommitParent, Ref, RepoCommit,
    RepoSnapshot,
};
use crate::store::Store;

/// Keeps every record in ordered maps keyed by natural identity, so writing
/// the same record twice leaves a single entry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub commits: BTreeMap<String, Commit>,
    pub repo_commits: BTreeMap<(String, String), RepoCommit>,
    pub refs: BTreeMap<String, Ref>,
    pub commit_files: BTreeMap<String, CommitFile>,
    pub commit_parents: BTreeMap<(String, String), CommitParent>,
    pub commit_file_components: BTreeMap<String, CommitFileComponent>,
    pub commit_line_changes: BTreeMap<String, CommitLineChange>,
    /// (repo id, file path, line number) -> row
    pub snapshot: BTreeMap<(String, String, u32), RepoSnapshot>,
    pub close_count: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot rows of one file, ordered by line number.
    pub fn snapshot_for(&self, file_path: &str) -> Vec<&RepoSnapshot> {
        self.snapshot
            .values()
            .filter(|row| row.file_path == file_path)
            .collect()
    }

    pub fn files_of(&self, commit_sha: &str) -> Vec<&CommitFile> {
        self.commit_files
            .values()
            .filter(|f| f.commit_sha == commit_sha)
            .collect()
    }

    pub fn parents_of(&self, commit_sha: &str) -> Vec<&str> {
        self.commit_parents
            .values()
            .filter(|p| p.commit_sha == commit_sha)
            .map(|p| p.parent_commit_sha.as_str())
            .collect()
    }
}

impl Store for MemoryStore {
    fn commits(&mut self, commit: &Commit) -> Result<()> {
        self.commits.insert(commit.sha.clone(), commit.clone());
        Ok(())
    }

    fn repo_commits(&mut self, link: &RepoCommit) -> Result<()> {
        self.repo_commits
            .insert((link.repo_id.clone(), link.commit_sha.clone()), link.clone());
        Ok(())
    }

    fn refs(&mut self, reference: &Ref) -> Result<()> {
        self.refs.insert(reference.id.clone(), reference.clone());
        Ok(())
    }

    fn commit_files(&mut self, file: &CommitFile) -> Result<()> {
        self.commit_files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    fn commit_parents(&mut self, links: &[CommitParent]) -> Result<()> {
        for link in links {
            self.commit_parents.insert(
                (link.commit_sha.clone(), link.parent_commit_sha.clone()),
                link.clone(),
            );
        }
        Ok(())
    }

    fn commit_file_components(&mut self, component: &CommitFileComponent) -> Result<()> {
        self.commit_file_components
            .insert(component.commit_file_id.clone(), component.clone());
        Ok(())
    }

    fn commit_line_change(&mut self, change: &CommitLineChange) -> Result<()> {
        self.commit_line_changes.insert(change.id.clone(), change.clone());
        Ok(())
    }

    fn clear_repo_snapshot(&mut self, repo_id: &str) -> Result<()> {
        self.snapshot.retain(|(repo, _, _), _| repo != repo_id);
        Ok(())
    }

    fn repo_snapshot(&mut self, row: &RepoSnapshot) -> Result<()> {
        self.snapshot.insert(
            (row.repo_id.clone(), row.file_path.clone(), row.line_no),
            row.clone(),
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.close_count += 1;
        Ok(())
    }
}
