use git2::{ErrorCode, ObjectType, Oid, Repository};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, check_cancelled};

/// Every commit object in the object database, sorted by id.
///
/// Objects unreachable from any ref are included; the database, not the ref
/// graph, is the source of truth.
pub fn commit_ids(repo: &Repository, cancel: &CancellationToken) -> Result<Vec<Oid>> {
    let odb = repo.odb()?;
    let mut all = Vec::new();
    odb.foreach(|oid| {
        all.push(*oid);
        true
    })?;

    let mut commits = Vec::new();
    for oid in all {
        check_cancelled(cancel)?;
        match odb.read_header(oid) {
            Ok((_, ObjectType::Commit)) => commits.push(oid),
            Ok(_) => {}
            Err(e) => debug!("Skipping unreadable object {}: {}", oid, e),
        }
    }
    // Packs and loose objects may hold the same object twice.
    commits.sort();
    commits.dedup();
    Ok(commits)
}

/// Parent ids exactly as written in the commit object.
///
/// `Commit::parent_ids` hides the parents of shallow boundary commits; the
/// raw header keeps them, so a missing parent is seen as missing.
pub fn raw_parent_ids(commit: &git2::Commit) -> Vec<Oid> {
    let header = String::from_utf8_lossy(commit.raw_header_bytes());
    header
        .lines()
        .filter_map(|line| line.strip_prefix("parent "))
        .filter_map(|id| Oid::from_str(id.trim()).ok())
        .collect()
}

/// HEAD's first-parent chain, oldest first.
///
/// The walk stops at a root commit or at a commit whose first parent is not
/// in the object database. An unborn HEAD yields an empty chain.
pub fn first_parent_chain(repo: &Repository, cancel: &CancellationToken) -> Result<Vec<Oid>> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            debug!("HEAD is unborn, nothing to replay");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut commit = head.peel_to_commit()?;
    let mut chain = Vec::new();
    loop {
        check_cancelled(cancel)?;
        chain.push(commit.id());
        let Some(parent_id) = raw_parent_ids(&commit).first().copied() else {
            break;
        };
        match repo.find_commit(parent_id) {
            Ok(parent) => commit = parent,
            Err(_) => {
                info!(
                    "First parent {} of {} is missing, replay starts at {}",
                    parent_id,
                    commit.id(),
                    commit.id()
                );
                break;
            }
        }
    }

    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn commit_file(repo: &Repository, dir: &Path, name: &str, content: &str) -> Oid {
        fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, name, &tree, &parents).unwrap()
    }

    #[test]
    fn test_unborn_head_has_empty_chain() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let chain = first_parent_chain(&repo, &CancellationToken::new()).unwrap();
        assert!(chain.is_empty());
        assert!(commit_ids(&repo, &CancellationToken::new()).unwrap().is_empty());
    }

    #[test]
    fn test_chain_is_oldest_first() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit_file(&repo, dir.path(), "a.txt", "one\n");
        let c2 = commit_file(&repo, dir.path(), "b.txt", "two\n");
        let c3 = commit_file(&repo, dir.path(), "c.txt", "three\n");

        let chain = first_parent_chain(&repo, &CancellationToken::new()).unwrap();
        assert_eq!(chain, vec![c1, c2, c3]);

        let mut expected = vec![c1, c2, c3];
        expected.sort();
        assert_eq!(commit_ids(&repo, &CancellationToken::new()).unwrap(), expected);
    }

    #[test]
    fn test_raw_parent_ids_match_parent_ids() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let c1 = commit_file(&repo, dir.path(), "a.txt", "one\n");
        let c2 = commit_file(&repo, dir.path(), "a.txt", "two\n");
        let commit = repo.find_commit(c2).unwrap();
        assert_eq!(raw_parent_ids(&commit), vec![c1]);
        assert!(raw_parent_ids(&repo.find_commit(c1).unwrap()).is_empty());
    }

    #[test]
    fn test_cancelled_walk() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        commit_file(&repo, dir.path(), "a.txt", "one\n");
        let token = CancellationToken::new();
        token.cancel();
        assert!(commit_ids(&repo, &token).unwrap_err().is_cancelled());
        assert!(first_parent_chain(&repo, &token).unwrap_err().is_cancelled());
    }
}
