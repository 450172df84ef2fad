//! Record sinks.
//!
//! `Store` is the single-writer destination for everything the extractor
//! emits. Writes are upserts keyed by each record's natural identity; the
//! extractor never reads back what it wrote during a run.
//!
//! - `MemoryStore`: keyed in-memory maps, used by tests and embedders
//! - `JsonLinesStore`: one `<entity>.jsonl` file per record type

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonLinesStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{
    Commit, CommitFile, CommitFileComponent, CommitLineChange, CommitParent, Ref, RepoCommit,
    RepoSnapshot,
};

pub trait Store {
    fn commits(&mut self, commit: &Commit) -> Result<()>;

    fn repo_commits(&mut self, link: &RepoCommit) -> Result<()>;

    fn refs(&mut self, reference: &Ref) -> Result<()>;

    fn commit_files(&mut self, file: &CommitFile) -> Result<()>;

    /// All resolvable parent links of one commit, in parent order.
    fn commit_parents(&mut self, links: &[CommitParent]) -> Result<()>;

    fn commit_file_components(&mut self, component: &CommitFileComponent) -> Result<()>;

    fn commit_line_change(&mut self, change: &CommitLineChange) -> Result<()>;

    /// Drops every snapshot row previously written for `repo_id`.
    fn clear_repo_snapshot(&mut self, repo_id: &str) -> Result<()>;

    fn repo_snapshot(&mut self, row: &RepoSnapshot) -> Result<()>;

    /// Flushes buffered records. Called exactly once per run.
    fn close(&mut self) -> Result<()>;
}
