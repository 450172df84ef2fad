use git2::{ObjectType, Oid, ReferenceType, Repository};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acquire::RepositoryHandle;
use crate::error::{ExtractorError, Result, check_cancelled};
use crate::git::diff::{self, diff_options};
use crate::git::history::{commit_ids, first_parent_chain, raw_parent_ids};
use crate::git::{CollectorConfig, RepoCollector, SnapshotBuilder, emit_commit};
use crate::models::{Commit, Ref, RefKind, Signature};
use crate::store::Store;

pub struct Libgit2Collector {
    repo: Option<Repository>,
    handle: Option<RepositoryHandle>,
    config: CollectorConfig,
}

impl Libgit2Collector {
    pub fn open(handle: RepositoryHandle, config: CollectorConfig) -> Result<Self> {
        let repo = Repository::discover(handle.path())?;
        debug!("Opened {:?} with libgit2", handle.path());
        Ok(Self {
            repo: Some(repo),
            handle: Some(handle),
            config,
        })
    }

    fn repo(&self) -> Result<&Repository> {
        self.repo
            .as_ref()
            .ok_or_else(|| ExtractorError::InvalidInput("collector already closed".to_string()))
    }

    fn branches(&self, cancel: &CancellationToken) -> Result<Vec<Ref>> {
        let repo = self.repo()?;
        let mut refs = Vec::new();
        for entry in repo.branches(None)? {
            check_cancelled(cancel)?;
            let (branch, _) = entry?;
            let reference = branch.get();
            if reference.kind() == Some(ReferenceType::Symbolic) {
                continue;
            }
            let Some(name) = reference.shorthand() else {
                continue;
            };
            // Peel to a commit, else resolve the name, else take the raw target.
            let sha = match reference.peel_to_commit() {
                Ok(commit) => Some(commit.id()),
                Err(_) => repo
                    .revparse_single(name)
                    .map(|obj| obj.id())
                    .ok()
                    .or_else(|| reference.target()),
            };
            let Some(sha) = sha else {
                warn!("Branch {} has no target, skipping", name);
                continue;
            };
            refs.push(Ref::new(
                &self.config.repo_id,
                name,
                sha.to_string(),
                RefKind::Branch,
                branch.is_head(),
            ));
        }
        Ok(refs)
    }

    fn tags(&self, cancel: &CancellationToken) -> Result<Vec<Ref>> {
        let repo = self.repo()?;
        let mut refs = Vec::new();
        for reference in repo.references_glob("refs/tags/*")? {
            check_cancelled(cancel)?;
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            let sha = match reference.peel(ObjectType::Commit) {
                Ok(obj) => Some(obj.id()),
                Err(_) => reference.target(),
            };
            let Some(sha) = sha else {
                continue;
            };
            refs.push(Ref::new(
                &self.config.repo_id,
                name,
                sha.to_string(),
                RefKind::Tag,
                false,
            ));
        }
        Ok(refs)
    }

    fn diff_against_parent(
        &self,
        commit: &git2::Commit,
        parent: Option<&git2::Commit>,
    ) -> Result<Vec<diff::FileStat>> {
        let repo = self.repo()?;
        let tree = commit.tree()?;
        let parent_tree = parent.map(|p| p.tree()).transpose()?;
        let mut opts = diff_options();
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
        diff::file_stats(&diff)
    }
}

fn to_signature(sig: &git2::Signature) -> Signature {
    Signature::from_raw(
        &String::from_utf8_lossy(sig.name_bytes()),
        &String::from_utf8_lossy(sig.email_bytes()),
        sig.when().seconds(),
        sig.when().offset_minutes(),
    )
}

fn to_commit(commit: &git2::Commit, parents: &[Oid]) -> Commit {
    Commit {
        sha: commit.id().to_string(),
        message: String::from_utf8_lossy(commit.message_raw_bytes()).to_string(),
        author: to_signature(&commit.author()),
        committer: to_signature(&commit.committer()),
        additions: 0,
        deletions: 0,
        parents: parents.iter().map(Oid::to_string).collect(),
    }
}

impl RepoCollector for Libgit2Collector {
    fn count_tags(&self, cancel: &CancellationToken) -> Result<usize> {
        Ok(self.tags(cancel)?.len())
    }

    fn count_branches(&self, cancel: &CancellationToken) -> Result<usize> {
        Ok(self.branches(cancel)?.len())
    }

    fn count_commits(&self, cancel: &CancellationToken) -> Result<usize> {
        Ok(commit_ids(self.repo()?, cancel)?.len())
    }

    fn collect_tags(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()> {
        for tag in self.tags(cancel)? {
            store.refs(&tag)?;
        }
        Ok(())
    }

    fn collect_branches(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()> {
        for branch in self.branches(cancel)? {
            store.refs(&branch)?;
        }
        Ok(())
    }

    fn collect_commits(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()> {
        let repo = self.repo()?;
        let ids = commit_ids(repo, cancel)?;
        info!("Collecting {} commits", ids.len());

        for oid in ids {
            check_cancelled(cancel)?;
            let commit = match repo.find_commit(oid) {
                Ok(commit) => commit,
                Err(e) => {
                    warn!("Cannot read commit {}: {}", oid, e);
                    continue;
                }
            };
            let parent_ids = raw_parent_ids(&commit);
            let parents: Vec<Option<git2::Commit>> =
                parent_ids.iter().map(|id| repo.find_commit(*id).ok()).collect();
            let resolvable: Vec<String> = parent_ids
                .iter()
                .zip(&parents)
                .filter(|(_, p)| p.is_some())
                .map(|(id, _)| id.to_string())
                .collect();

            let files = match parents.first() {
                _ if !self.config.wants_diff() => None,
                None => Some(self.diff_against_parent(&commit, None)?),
                Some(Some(parent)) => Some(self.diff_against_parent(&commit, Some(parent))?),
                Some(None) => {
                    info!("First parent of {} is missing, skipping its stats", oid);
                    None
                }
            };

            emit_commit(
                store,
                &self.config,
                to_commit(&commit, &parent_ids),
                &resolvable,
                files.as_deref(),
            )?;
        }
        Ok(())
    }

    fn collect_diff_lines(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()> {
        let repo = self.repo()?;
        let chain = first_parent_chain(repo, cancel)?;
        if chain.is_empty() {
            return Ok(());
        }
        info!("Replaying {} commits for blame", chain.len());

        let mut builder = SnapshotBuilder::new(&self.config.repo_id);
        let mut prev_tree = None;
        for oid in chain {
            check_cancelled(cancel)?;
            let tree = repo.find_commit(oid)?.tree()?;
            let mut opts = diff_options();
            let diff = repo.diff_tree_to_tree(prev_tree.as_ref(), Some(&tree), Some(&mut opts))?;
            let changes = diff::line_changes(&diff, cancel)?;
            builder.apply(&oid.to_string(), &changes, store)?;
            prev_tree = Some(tree);
        }
        builder.finish(store)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // The repository must be dropped before its directory goes away.
        self.repo.take();
        if let Some(handle) = self.handle.take() {
            handle.release()?;
        }
        Ok(())
    }
}

impl Drop for Libgit2Collector {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to release repository: {}", e);
        }
    }
}
