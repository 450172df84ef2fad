use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RefKind {
    Branch,
    Tag,
}

/// A branch or tag. Branch names are short (`main`, `origin/main`), tag names
/// are full ref names (`refs/tags/v1.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    pub id: String,
    pub repo_id: String,
    pub name: String,
    pub commit_sha: String,
    pub kind: RefKind,
    pub is_default: bool,
}

impl Ref {
    pub fn new(
        repo_id: &str,
        name: &str,
        commit_sha: String,
        kind: RefKind,
        is_default: bool,
    ) -> Self {
        Self {
            id: format!("{}:{}", repo_id, name),
            repo_id: repo_id.to_string(),
            name: name.to_string(),
            commit_sha,
            kind,
            is_default,
        }
    }
}
