//! Per-commit file records.
//!
//! - `CommitFile`: additions/deletions of one path in one commit
//! - `CommitFileComponent`: component a commit file was classified into
//! - `CommitLineChange`: a single added or deleted line seen during blame replay

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Component assigned when no pattern of the component table matches.
pub const DEFAULT_COMPONENT: &str = "Default";

/// Stable id for a (commit, path) pair. The path is hashed so the id stays
/// fixed-width no matter how long the path is.
pub fn commit_file_id(commit_sha: &str, path: &str) -> String {
    format!("{}:{:x}", commit_sha, Sha256::digest(path.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFile {
    pub id: String,
    pub commit_sha: String,
    pub file_path: String,
    pub additions: usize,
    pub deletions: usize,
}

impl CommitFile {
    pub fn new(commit_sha: &str, file_path: &str, additions: usize, deletions: usize) -> Self {
        Self {
            id: commit_file_id(commit_sha, file_path),
            commit_sha: commit_sha.to_string(),
            file_path: file_path.to_string(),
            additions,
            deletions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFileComponent {
    pub commit_file_id: String,
    pub component_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineChangeKind {
    #[serde(rename = "+")]
    Added,
    #[serde(rename = "-")]
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLineChange {
    pub id: String,
    pub commit_sha: String,
    pub old_file_path: String,
    pub new_file_path: String,
    pub line_no_old: Option<u32>,
    pub line_no_new: Option<u32>,
    pub changed_type: LineChangeKind,
    pub hunk_num: u32,
    /// Commit that owned a deleted line before this commit; empty for additions.
    pub prev_commit: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_file_id_is_fixed_width() {
        let sha = "a".repeat(40);
        let short = commit_file_id(&sha, "a.txt");
        let long = commit_file_id(&sha, &"dir/".repeat(200));
        assert_eq!(short.len(), 40 + 1 + 64);
        assert_eq!(short.len(), long.len());
        assert_ne!(short, long);
    }

    #[test]
    fn test_commit_file_id_is_deterministic() {
        assert_eq!(commit_file_id("abc", "src/lib.rs"), commit_file_id("abc", "src/lib.rs"));
        assert_ne!(commit_file_id("abc", "src/lib.rs"), commit_file_id("abd", "src/lib.rs"));
    }
}
