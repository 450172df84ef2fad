//! Commit graph reader built on `git` plumbing.
//!
//! Reads the same repository as `Libgit2Collector` without linking libgit2:
//! - objects: `cat-file --batch-all-objects`, `cat-file --batch`
//! - refs: `for-each-ref`, `symbolic-ref`, `rev-parse`
//! - diffs: `diff-tree --numstat` for statistics, `diff-tree -p -U0` for lines

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acquire::RepositoryHandle;
use crate::error::{ExtractorError, Result, check_cancelled};
use crate::git::diff::{FileLineChanges, FileStat, LineChange};
use crate::git::exec::{GitCommand, GitOutput, empty_tree_id, git_in};
use crate::git::{CollectorConfig, RepoCollector, SnapshotBuilder, emit_commit};
use crate::models::{Commit, LineChangeKind, Ref, RefKind, Signature};
use crate::store::Store;

/// Commits read per `cat-file --batch` invocation.
const BATCH_SIZE: usize = 512;

const DIFF_TREE: &[&str] = &[
    "diff-tree",
    "-r",
    "--no-renames",
    "--no-indent-heuristic",
    "--ignore-submodules",
    "--no-ext-diff",
    "--diff-algorithm=myers",
];

pub struct GitCliCollector {
    dir: Option<PathBuf>,
    handle: Option<RepositoryHandle>,
    config: CollectorConfig,
    /// Diff base of root commits, in the repository's hash format.
    empty_tree: String,
}

/// A commit object as stored, before any lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    pub sha: String,
    pub parents: Vec<String>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl RawCommit {
    fn into_commit(self) -> Commit {
        Commit {
            sha: self.sha,
            message: self.message,
            author: self.author,
            committer: self.committer,
            additions: 0,
            deletions: 0,
            parents: self.parents,
        }
    }
}

impl GitCliCollector {
    pub fn open(handle: RepositoryHandle, config: CollectorConfig) -> Result<Self> {
        let cancel = CancellationToken::new();
        git_in(handle.path(), &["rev-parse", "--git-dir"], &cancel)?;
        let empty_tree = empty_tree_id(handle.path(), &cancel)?;
        debug!("Opened {:?} with the git command line", handle.path());
        Ok(Self {
            dir: Some(handle.path().to_path_buf()),
            handle: Some(handle),
            config,
            empty_tree,
        })
    }

    fn dir(&self) -> Result<&Path> {
        self.dir
            .as_deref()
            .ok_or_else(|| ExtractorError::InvalidInput("collector already closed".to_string()))
    }

    fn git(&self, args: &[&str], cancel: &CancellationToken) -> Result<GitOutput> {
        git_in(self.dir()?, args, cancel)
    }

    /// Every commit object in the object database, sorted by id.
    fn commit_ids(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let out = self.git(&["cat-file", "--batch-all-objects", "--batch-check"], cancel)?;
        let mut ids: Vec<String> = out
            .stdout_str()
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let id = fields.next()?;
                (fields.next() == Some("commit")).then(|| id.to_string())
            })
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn read_commits(&self, ids: &[String], cancel: &CancellationToken) -> Result<Vec<RawCommit>> {
        let mut commits = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            check_cancelled(cancel)?;
            let stdin = format!("{}\n", chunk.join("\n")).into_bytes();
            let out = GitCommand::new(["cat-file", "--batch"])
                .current_dir(self.dir()?)
                .stdin(stdin)
                .run(cancel)?;
            for (sha, kind, body) in parse_batch(&out.stdout)? {
                if kind != "commit" {
                    warn!("Object {} is a {}, not a commit", sha, kind);
                    continue;
                }
                commits.push(parse_commit(&sha, body)?);
            }
        }
        Ok(commits)
    }

    /// Commit id `rev` resolves to, if any.
    fn resolve_commit(&self, rev: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        let spec = format!("{}^{{commit}}", rev);
        match self.git(&["rev-parse", "--verify", "-q", spec.as_str()], cancel) {
            Ok(out) => Ok(Some(out.stdout_str().trim().to_string()).filter(|s| !s.is_empty())),
            Err(e) if e.is_cancelled() => Err(e),
            Err(_) => Ok(None),
        }
    }

    fn head_ref(&self, cancel: &CancellationToken) -> Result<Option<String>> {
        match self.git(&["symbolic-ref", "-q", "HEAD"], cancel) {
            Ok(out) => Ok(Some(out.stdout_str().trim().to_string())),
            Err(e) if e.is_cancelled() => Err(e),
            Err(_) => Ok(None),
        }
    }

    fn branches(&self, cancel: &CancellationToken) -> Result<Vec<Ref>> {
        let head = self.head_ref(cancel)?;
        let out = self.git(
            &[
                "for-each-ref",
                "--format=%(refname)%00%(objectname)%00%(objecttype)%00%(symref)",
                "refs/heads",
                "refs/remotes",
            ],
            cancel,
        )?;

        let mut refs = Vec::new();
        for line in out.stdout_str().lines() {
            check_cancelled(cancel)?;
            let fields: Vec<&str> = line.split('\0').collect();
            let [refname, objectname, objecttype, symref] = fields[..] else {
                return Err(ExtractorError::Parse(format!("for-each-ref line {:?}", line)));
            };
            if !symref.is_empty() {
                continue;
            }
            let name = refname
                .strip_prefix("refs/heads/")
                .or_else(|| refname.strip_prefix("refs/remotes/"))
                .unwrap_or(refname);
            let sha = if objecttype == "commit" {
                objectname.to_string()
            } else {
                self.resolve_commit(refname, cancel)?
                    .unwrap_or_else(|| objectname.to_string())
            };
            let is_default = head.as_deref() == Some(refname);
            refs.push(Ref::new(&self.config.repo_id, name, sha, RefKind::Branch, is_default));
        }
        Ok(refs)
    }

    fn tags(&self, cancel: &CancellationToken) -> Result<Vec<Ref>> {
        let out = self.git(
            &[
                "for-each-ref",
                "--format=%(refname)%00%(objectname)%00%(objecttype)%00%(*objectname)%00%(*objecttype)",
                "refs/tags",
            ],
            cancel,
        )?;

        let mut refs = Vec::new();
        for line in out.stdout_str().lines() {
            check_cancelled(cancel)?;
            let fields: Vec<&str> = line.split('\0').collect();
            let [refname, objectname, objecttype, peeled, peeled_type] = fields[..] else {
                return Err(ExtractorError::Parse(format!("for-each-ref line {:?}", line)));
            };
            let sha = match (objecttype, peeled_type) {
                ("commit", _) => objectname.to_string(),
                (_, "commit") => peeled.to_string(),
                // Nested tags, or tags of trees and blobs.
                _ => self
                    .resolve_commit(refname, cancel)?
                    .unwrap_or_else(|| objectname.to_string()),
            };
            refs.push(Ref::new(&self.config.repo_id, refname, sha, RefKind::Tag, false));
        }
        Ok(refs)
    }

    fn diff_stats(
        &self,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileStat>> {
        let mut args: Vec<&str> = DIFF_TREE.to_vec();
        args.extend(["-z", "--numstat", from, to]);
        let out = self.git(&args, cancel)?;
        Ok(parse_numstat(&out.stdout))
    }

    fn diff_lines(
        &self,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileLineChanges>> {
        let mut args: Vec<&str> = DIFF_TREE.to_vec();
        args.extend(["-p", "-U0", "--no-prefix", "--no-color", from, to]);
        let out = self.git(&args, cancel)?;
        parse_patch(&out.stdout_str())
    }

    /// HEAD's first-parent chain, oldest first; stops at a missing parent.
    ///
    /// `known` is every commit in the object database, sorted.
    fn first_parent_chain(
        &self,
        known: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let Some(head) = self.resolve_commit("HEAD", cancel)? else {
            debug!("HEAD is unborn, nothing to replay");
            return Ok(Vec::new());
        };
        let first_parents: HashMap<String, Option<String>> = self
            .read_commits(known, cancel)?
            .into_iter()
            .map(|commit| (commit.sha, commit.parents.into_iter().next()))
            .collect();

        let mut chain = Vec::new();
        let mut current = head;
        loop {
            check_cancelled(cancel)?;
            let parent = first_parents
                .get(&current)
                .ok_or_else(|| ExtractorError::MissingObject(current.clone()))?
                .clone();
            match parent {
                Some(parent) if first_parents.contains_key(&parent) => {
                    chain.push(std::mem::replace(&mut current, parent));
                }
                Some(parent) => {
                    info!(
                        "First parent {} of {} is missing, replay starts at {}",
                        parent, current, current
                    );
                    chain.push(current);
                    break;
                }
                None => {
                    chain.push(current);
                    break;
                }
            }
        }
        chain.reverse();
        Ok(chain)
    }
}

impl RepoCollector for GitCliCollector {
    fn count_tags(&self, cancel: &CancellationToken) -> Result<usize> {
        Ok(self.tags(cancel)?.len())
    }

    fn count_branches(&self, cancel: &CancellationToken) -> Result<usize> {
        Ok(self.branches(cancel)?.len())
    }

    fn count_commits(&self, cancel: &CancellationToken) -> Result<usize> {
        Ok(self.commit_ids(cancel)?.len())
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
        let ids = self.commit_ids(cancel)?;
        info!("Collecting {} commits", ids.len());

        for chunk in ids.chunks(BATCH_SIZE) {
            for raw in self.read_commits(chunk, cancel)? {
                check_cancelled(cancel)?;
                let resolvable: Vec<String> = raw
                    .parents
                    .iter()
                    .filter(|p| ids.binary_search(p).is_ok())
                    .cloned()
                    .collect();

                let files = match raw.parents.first() {
                    _ if !self.config.wants_diff() => None,
                    None => Some(self.diff_stats(&self.empty_tree, &raw.sha, cancel)?),
                    Some(parent) if resolvable.first() == Some(parent) => {
                        Some(self.diff_stats(parent, &raw.sha, cancel)?)
                    }
                    Some(_) => {
                        info!("First parent of {} is missing, skipping its stats", raw.sha);
                        None
                    }
                };

                emit_commit(store, &self.config, raw.into_commit(), &resolvable, files.as_deref())?;
            }
        }
        Ok(())
    }

    fn collect_diff_lines(&self, cancel: &CancellationToken, store: &mut dyn Store) -> Result<()> {
        let known = self.commit_ids(cancel)?;
        let chain = self.first_parent_chain(&known, cancel)?;
        if chain.is_empty() {
            return Ok(());
        }
        info!("Replaying {} commits for blame", chain.len());

        let mut builder = SnapshotBuilder::new(&self.config.repo_id);
        let mut prev: &str = &self.empty_tree;
        for sha in &chain {
            check_cancelled(cancel)?;
            let changes = self.diff_lines(prev, sha, cancel)?;
            builder.apply(sha, &changes, store)?;
            prev = sha.as_str();
        }
        builder.finish(store)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.dir.take();
        if let Some(handle) = self.handle.take() {
            handle.release()?;
        }
        Ok(())
    }
}

impl Drop for GitCliCollector {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to release repository: {}", e);
        }
    }
}

/// Splits `cat-file --batch` output into (id, type, body) triples.
/// Missing objects are skipped.
pub fn parse_batch(data: &[u8]) -> Result<Vec<(String, String, &[u8])>> {
    let mut objects = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let Some(eol) = data[pos..].iter().position(|&b| b == b'\n') else {
            break;
        };
        let header = String::from_utf8_lossy(&data[pos..pos + eol]).to_string();
        pos += eol + 1;

        let fields: Vec<&str> = header.split_whitespace().collect();
        match fields[..] {
            [id, "missing"] => debug!("Object {} is missing", id),
            [id, kind, size] => {
                let size: usize = size
                    .parse()
                    .map_err(|_| ExtractorError::Parse(format!("cat-file header {:?}", header)))?;
                let end = pos + size;
                if end > data.len() {
                    return Err(ExtractorError::Parse(format!("truncated object {}", id)));
                }
                objects.push((id.to_string(), kind.to_string(), &data[pos..end]));
                pos = end;
                if data.get(pos) == Some(&b'\n') {
                    pos += 1;
                }
            }
            _ if header.is_empty() => {}
            _ => return Err(ExtractorError::Parse(format!("cat-file header {:?}", header))),
        }
    }
    Ok(objects)
}

/// Parses a raw commit object body.
pub fn parse_commit(sha: &str, body: &[u8]) -> Result<RawCommit> {
    let text = String::from_utf8_lossy(body);
    let (header, message) = match text.split_once("\n\n") {
        Some((header, message)) => (header, message),
        None => (text.as_ref(), ""),
    };

    let mut has_tree = false;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;
    for line in header.lines() {
        // Continuation of a multi-line header such as gpgsig.
        if line.starts_with(' ') {
            continue;
        }
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        match key {
            "tree" => has_tree = true,
            "parent" => parents.push(value.to_string()),
            "author" => author = parse_signature(value),
            "committer" => committer = parse_signature(value),
            _ => {}
        }
    }

    let missing = |field: &str| ExtractorError::Parse(format!("commit {} has no {}", sha, field));
    if !has_tree {
        return Err(missing("tree"));
    }
    Ok(RawCommit {
        sha: sha.to_string(),
        parents,
        author: author.ok_or_else(|| missing("author"))?,
        committer: committer.ok_or_else(|| missing("committer"))?,
        message: message.to_string(),
    })
}

/// `Name <email> 1700000000 +0200`
pub fn parse_signature(raw: &str) -> Option<Signature> {
    let open = raw.find('<')?;
    let close = open + raw[open..].find('>')?;
    let name = raw[..open].trim();
    let email = raw[open + 1..close].trim();
    let mut rest = raw[close + 1..].split_whitespace();
    let seconds: i64 = rest.next()?.parse().ok()?;
    let offset = rest.next().and_then(parse_tz_offset).unwrap_or(0);
    Some(Signature::from_raw(name, email, seconds, offset))
}

/// `+0130` -> 90 minutes.
fn parse_tz_offset(tz: &str) -> Option<i32> {
    let (sign, digits) = match tz.as_bytes().first()? {
        b'-' => (-1, &tz[1..]),
        b'+' => (1, &tz[1..]),
        _ => (1, tz),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

/// Parses `diff-tree -z --numstat`. Binary files (`-` counts) count 0/0.
pub fn parse_numstat(data: &[u8]) -> Vec<FileStat> {
    data.split(|&b| b == 0)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let record = String::from_utf8_lossy(record);
            let mut fields = record.splitn(3, '\t');
            let additions = fields.next()?.trim().parse().unwrap_or(0);
            let deletions = fields.next()?.parse().unwrap_or(0);
            let path = fields.next()?;
            Some(FileStat {
                path: path.to_string(),
                additions,
                deletions,
            })
        })
        .collect()
}

/// Undoes git's C-style path quoting (`"t\303\251st"` -> `tést`).
pub fn unquote_path(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return raw.to_string();
    };
    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        i += 1;
        match bytes[i] {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let digits = bytes[i..]
                    .iter()
                    .take(3)
                    .take_while(|b| (b'0'..=b'7').contains(b))
                    .count();
                let value = bytes[i..i + digits]
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                out.push(value as u8);
                i += digits - 1;
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

fn header_path(raw: &str) -> Option<String> {
    let raw = raw.strip_suffix('\t').unwrap_or(raw);
    if raw == "/dev/null" {
        None
    } else {
        Some(unquote_path(raw))
    }
}

/// `-12,3` or `+7` -> (start, count)
fn parse_range(range: &str) -> Option<(u32, u32)> {
    let range = &range[1..];
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// `@@ -a,b +c,d @@ context` -> ((a, b), (c, d))
fn parse_hunk_header(line: &str) -> Option<((u32, u32), (u32, u32))> {
    let body = line.strip_prefix("@@ ")?;
    let body = &body[..body.find(" @@")?];
    let (old, new) = body.split_once(' ')?;
    if !old.starts_with('-') || !new.starts_with('+') {
        return None;
    }
    Some((parse_range(old)?, parse_range(new)?))
}

/// Parses `diff-tree -p -U0 --no-prefix` output into per-file line changes.
/// Files without a text patch (binary, mode-only) are left out.
pub fn parse_patch(text: &str) -> Result<Vec<FileLineChanges>> {
    let mut files: Vec<FileLineChanges> = Vec::new();
    let mut current: Option<FileLineChanges> = None;
    let mut hunk = 0u32;
    let (mut old_line, mut new_line) = (0u32, 0u32);
    let (mut old_left, mut new_left) = (0u32, 0u32);

    for line in text.split('\n') {
        if old_left > 0 || new_left > 0 {
            let Some(file) = current.as_mut() else {
                return Err(ExtractorError::Parse("hunk outside of a file".to_string()));
            };
            match line.as_bytes().first() {
                Some(b'-') if old_left > 0 => {
                    file.lines.push(LineChange {
                        kind: LineChangeKind::Deleted,
                        old_lineno: Some(old_line),
                        new_lineno: None,
                        hunk,
                    });
                    old_line += 1;
                    old_left -= 1;
                }
                Some(b'+') if new_left > 0 => {
                    file.lines.push(LineChange {
                        kind: LineChangeKind::Added,
                        old_lineno: None,
                        new_lineno: Some(new_line),
                        hunk,
                    });
                    new_line += 1;
                    new_left -= 1;
                }
                Some(b' ') => {
                    old_line += 1;
                    new_line += 1;
                    old_left = old_left.saturating_sub(1);
                    new_left = new_left.saturating_sub(1);
                }
                Some(b'\\') => {}
                _ => {
                    return Err(ExtractorError::Parse(format!("unexpected patch line {:?}", line)));
                }
            }
            continue;
        }

        if line.starts_with("diff --git ") {
            if let Some(file) = current.take() {
                files.push(file);
            }
            current = Some(FileLineChanges::default());
            hunk = 0;
        } else if let Some(path) = line.strip_prefix("--- ") {
            if let Some(file) = current.as_mut() {
                file.old_path = header_path(path);
            }
        } else if let Some(path) = line.strip_prefix("+++ ") {
            if let Some(file) = current.as_mut() {
                file.new_path = header_path(path);
            }
        } else if line.starts_with("@@ ") {
            let ((old_start, old_count), (new_start, new_count)) = parse_hunk_header(line)
                .ok_or_else(|| ExtractorError::Parse(format!("hunk header {:?}", line)))?;
            hunk += 1;
            old_line = old_start;
            new_line = new_start;
            old_left = old_count;
            new_left = new_count;
        }
    }
    if let Some(file) = current.take() {
        files.push(file);
    }

    files.retain(|f| f.old_path.is_some() || f.new_path.is_some());
    Ok(files)
}
