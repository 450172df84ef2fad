//! Commit graph readers.
//!
//! `RepoCollector` is the one interface the extractor drives. Two backends
//! implement it over the same on-disk repository:
//! - `Libgit2Collector`: libgit2 through `git2`
//! - `GitCliCollector`: `git` plumbing commands
//!
//! Both must report identical counts, refs and commits for the same input.

pub mod blame;
pub mod cli;
pub mod diff;
pub mod exec;
pub mod history;
pub mod repository;

pub use blame::{FileBlame, SnapshotBuilder};
pub use cli::GitCliCollector;
pub use diff::{ComponentTable, FileLineChanges, FileStat, LineChange};
pub use repository::Libgit2Collector;

use tokio_util::sync::CancellationToken;

use crate::acquire::RepositoryHandle;
use crate::config::{Backend, ExtractorOptions};
use crate::error::Result;
use crate::models::{Commit, CommitParent, RepoCommit};
use crate::store::Store;

/// What a collector writes and how it labels it.
#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    pub repo_id: String,
    pub skip_commit_stat: bool,
    pub skip_commit_files: bool,
    pub components: ComponentTable,
}

impl CollectorConfig {
    pub fn from_options(options: &ExtractorOptions) -> Self {
        Self {
            repo_id: options.repo_id.clone(),
            skip_commit_stat: options.skip_commit_stat,
            skip_commit_files: options.skip_commit_files,
            components: options.components.clone(),
        }
    }

    /// Whether commits need a diff against their first parent at all.
    pub fn wants_diff(&self) -> bool {
        !(self.skip_commit_stat && self.skip_commit_files)
    }
}

pub trait RepoCollector {
    fn count_tags(&self, cancel: &CancellationToken) -> Result<usize>;

    fn count_branches(&self, cancel: &CancellationToken) -> Result<usize>;

    fn count_commits(&self, cancel: &CancellationToken) -> Result<usize>;

    fn collect_tags(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()>;

    fn collect_branches(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()>;

    fn collect_commits(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()>;

    /// Replays HEAD's first-parent history into line changes and the
    /// repository snapshot.
    fn collect_diff_lines(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()>;

    /// Releases the repository. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

pub fn open_collector(
    backend: Backend,
    handle: RepositoryHandle,
    config: CollectorConfig,
) -> Result<Box<dyn RepoCollector>> {
    Ok(match backend {
        Backend::Libgit2 => Box::new(Libgit2Collector::open(handle, config)?),
        Backend::GitCli => Box::new(GitCliCollector::open(handle, config)?),
    })
}

/// Writes one commit with its repo link, parent links and, when collected,
/// per-file records.
///
/// `files` is `None` when the diff was skipped; the commit then reports zero
/// additions and deletions.
pub(crate) fn emit_commit(
    store: &mut dyn Store,
    config: &CollectorConfig,
    mut commit: Commit,
    resolvable_parents: &[String],
    files: Option<&[FileStat]>,
) -> Result<()> {
    if let (Some(files), false) = (files, config.skip_commit_stat) {
        commit.additions = files.iter().map(|f| f.additions).sum();
        commit.deletions = files.iter().map(|f| f.deletions).sum();
    }

    store.commits(&commit)?;
    store.repo_commits(&RepoCommit {
        repo_id: config.repo_id.clone(),
        commit_sha: commit.sha.clone(),
    })?;
    let links: Vec<CommitParent> = resolvable_parents
        .iter()
        .map(|parent| CommitParent {
            commit_sha: commit.sha.clone(),
            parent_commit_sha: parent.clone(),
        })
        .collect();
    store.commit_parents(&links)?;

    if let (Some(files), false) = (files, config.skip_commit_files) {
        diff::record_commit_files(store, &commit.sha, files, &config.components)?;
    }
    Ok(())
}
