//! Line ownership rows.
//!
//! The final output of blame replay: which commit last touched each line of
//! each file, as of the newest commit on HEAD's first-parent chain.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub repo_id: String,
    pub file_path: String,
    /// Line number (1-indexed)
    pub line_no: u32,
    /// Commit that last added this line
    pub commit_sha: String,
}
