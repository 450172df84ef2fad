//! Repository fixtures shared by the integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{Commit, ObjectType, Oid, Repository, Signature, Time, TreeWalkMode, TreeWalkResult};
use tempfile::TempDir;

pub const EPOCH: i64 = 1_700_000_000;
pub const DAY: i64 = 86_400;

/// A non-bare repository whose commits all go through the index onto HEAD.
pub struct RepoBuilder {
    pub repo: Repository,
    clock: Cell<i64>,
}

impl RepoBuilder {
    pub fn init(path: &Path) -> Self {
        let repo = Repository::init(path).unwrap();
        Self {
            repo,
            clock: Cell::new(EPOCH),
        }
    }

    pub fn workdir(&self) -> PathBuf {
        self.repo.workdir().unwrap().to_path_buf()
    }

    fn signature(&self, seconds: i64) -> Signature<'static> {
        Signature::new("Ada Lovelace", "ada@example.com", &Time::new(seconds, 60)).unwrap()
    }

    fn head_commit(&self) -> Option<Commit<'_>> {
        self.repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    /// Applies `changes` (`None` deletes the file) and commits on HEAD one
    /// minute after the previous commit.
    pub fn commit(&self, changes: &[(&str, Option<&str>)], message: &str) -> Oid {
        let at = self.clock.get() + 60;
        self.commit_at(changes, message, at)
    }

    pub fn commit_at(&self, changes: &[(&str, Option<&str>)], message: &str, seconds: i64) -> Oid {
        self.clock.set(seconds);
        let workdir = self.workdir();
        let mut index = self.repo.index().unwrap();
        for (path, content) in changes {
            let full = workdir.join(path);
            match content {
                Some(text) => {
                    if let Some(parent) = full.parent() {
                        fs::create_dir_all(parent).unwrap();
                    }
                    fs::write(&full, text).unwrap();
                    index.add_path(Path::new(path)).unwrap();
                }
                None => {
                    fs::remove_file(&full).unwrap();
                    index.remove_path(Path::new(path)).unwrap();
                }
            }
        }
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = self.signature(seconds);
        let parents: Vec<Commit<'_>> = self.head_commit().into_iter().collect();
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    /// Commits one top-level file on `branch` on top of `parent`, leaving
    /// HEAD and the index alone.
    pub fn commit_on_branch(&self, branch: &str, parent: Oid, path: &str, content: &str) -> Oid {
        let parent = self.repo.find_commit(parent).unwrap();
        let blob = self.repo.blob(content.as_bytes()).unwrap();
        let mut builder = self.repo.treebuilder(Some(&parent.tree().unwrap())).unwrap();
        builder.insert(path, blob, 0o100644).unwrap();
        let tree = self.repo.find_tree(builder.write().unwrap()).unwrap();
        let at = self.clock.get() + 60;
        self.clock.set(at);
        let sig = self.signature(at);
        self.repo
            .commit(
                Some(&format!("refs/heads/{}", branch)),
                &sig,
                &sig,
                &format!("work on {}\n", branch),
                &tree,
                &[&parent],
            )
            .unwrap()
    }

    /// Records a merge of `other` into HEAD keeping HEAD's tree.
    pub fn merge(&self, other: Oid) -> Oid {
        let head = self.head_commit().unwrap();
        let other = self.repo.find_commit(other).unwrap();
        let tree = head.tree().unwrap();
        let at = self.clock.get() + 60;
        self.clock.set(at);
        let sig = self.signature(at);
        self.repo
            .commit(Some("HEAD"), &sig, &sig, "Merge branch\n", &tree, &[&head, &other])
            .unwrap()
    }

    pub fn lightweight_tag(&self, name: &str, target: Oid) {
        let object = self.repo.find_object(target, None).unwrap();
        self.repo.tag_lightweight(name, &object, false).unwrap();
    }

    pub fn annotated_tag(&self, name: &str, target: Oid) -> Oid {
        let object = self.repo.find_object(target, None).unwrap();
        let sig = self.signature(self.clock.get());
        self.repo.tag(name, &object, &sig, "release\n", false).unwrap()
    }

    pub fn head_branch(&self) -> String {
        self.repo.head().unwrap().shorthand().unwrap().to_string()
    }
}

/// A repository in its own temporary directory.
pub struct Fixture {
    pub dir: TempDir,
    pub builder: RepoBuilder,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let builder = RepoBuilder::init(dir.path());
        Self { dir, builder }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file_url(&self) -> String {
        format!("file://{}", self.dir.path().to_string_lossy())
    }
}

impl std::ops::Deref for Fixture {
    type Target = RepoBuilder;

    fn deref(&self) -> &RepoBuilder {
        &self.builder
    }
}

/// main: C1 -> C2 -> C3 -> merge(feature), with `feature` branching off C2,
/// a lightweight tag on C1 and an annotated tag on C3.
pub fn branchy_fixture() -> (Fixture, Vec<Oid>) {
    let fx = Fixture::new();
    let c1 = fx.commit(
        &[("a.txt", Some("one\ntwo\nthree\n")), ("src/lib.rs", Some("fn a() {}\n"))],
        "first\n",
    );
    let c2 = fx.commit(&[("a.txt", Some("one\nTWO\nthree\nfour\n"))], "second\n");
    let feature = fx.commit_on_branch("feature", c2, "feature.txt", "f1\nf2\n");
    let c3 = fx.commit(
        &[("src/lib.rs", None), ("docs/readme.md", Some("# readme\n"))],
        "third\n\nwith a body\n",
    );
    let merge = fx.merge(feature);
    fx.lightweight_tag("v0.1", c1);
    fx.annotated_tag("v1.0", c3);
    (fx, vec![c1, c2, feature, c3, merge])
}

/// A bare repository holding only `commit` with its tree and blobs, so the
/// commit's parents are absent.
pub fn orphaned_copy(source: &Repository, commit: Oid, dest: &Path) -> Repository {
    let target = Repository::init_bare(dest).unwrap();
    let src_odb = source.odb().unwrap();
    let dst_odb = target.odb().unwrap();

    let tree = source.find_commit(commit).unwrap().tree().unwrap();
    let mut ids = vec![commit, tree.id()];
    tree.walk(TreeWalkMode::PreOrder, |_, entry| {
        ids.push(entry.id());
        TreeWalkResult::Ok
    })
    .unwrap();

    for id in ids {
        let object = src_odb.read(id).unwrap();
        let kind = object.kind();
        assert_ne!(kind, ObjectType::Any);
        dst_odb.write(kind, object.data()).unwrap();
    }
    drop(dst_odb);
    target
        .reference("refs/heads/main", commit, true, "orphaned copy")
        .unwrap();
    target.set_head("refs/heads/main").unwrap();
    target
}
