//! JSON-lines file sink used by the command line tool.
//!
//! Each record type goes to its own `<entity>.jsonl` file inside the output
//! directory. Files are truncated when the store is opened, so one store
//! holds the output of exactly one run.

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ExtractorError, Result};
use crate::models::{
    Commit, CommitFile, CommitFileComponent, CommitLineChange, CommitParent, Ref, RepoCommit,
    RepoSnapshot,
};
use crate::store::Store;

const SNAPSHOT_FILE: &str = "repo_snapshot.jsonl";

struct Writers {
    commits: BufWriter<File>,
    repo_commits: BufWriter<File>,
    refs: BufWriter<File>,
    commit_files: BufWriter<File>,
    commit_parents: BufWriter<File>,
    commit_file_components: BufWriter<File>,
    commit_line_changes: BufWriter<File>,
    repo_snapshot: BufWriter<File>,
}

impl Writers {
    fn all(&mut self) -> [&mut BufWriter<File>; 8] {
        [
            &mut self.commits,
            &mut self.repo_commits,
            &mut self.refs,
            &mut self.commit_files,
            &mut self.commit_parents,
            &mut self.commit_file_components,
            &mut self.commit_line_changes,
            &mut self.repo_snapshot,
        ]
    }
}

pub struct JsonLinesStore {
    dir: PathBuf,
    writers: Option<Writers>,
}

impl JsonLinesStore {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            Ok(BufWriter::new(File::create(dir.join(name))?))
        };
        let writers = Writers {
            commits: open("commits.jsonl")?,
            repo_commits: open("repo_commits.jsonl")?,
            refs: open("refs.jsonl")?,
            commit_files: open("commit_files.jsonl")?,
            commit_parents: open("commit_parents.jsonl")?,
            commit_file_components: open("commit_file_components.jsonl")?,
            commit_line_changes: open("commit_line_changes.jsonl")?,
            repo_snapshot: open(SNAPSHOT_FILE)?,
        };
        tracing::debug!("Writing records to {:?}", dir);
        Ok(Self {
            dir,
            writers: Some(writers),
        })
    }

    fn writers(&mut self) -> Result<&mut Writers> {
        self.writers
            .as_mut()
            .ok_or_else(|| ExtractorError::Store("store already closed".to_string()))
    }
}

fn write_line<T: Serialize>(out: &mut BufWriter<File>, record: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}

impl Store for JsonLinesStore {
    fn commits(&mut self, commit: &Commit) -> Result<()> {
        write_line(&mut self.writers()?.commits, commit)
    }

    fn repo_commits(&mut self, link: &RepoCommit) -> Result<()> {
        write_line(&mut self.writers()?.repo_commits, link)
    }

    fn refs(&mut self, reference: &Ref) -> Result<()> {
        write_line(&mut self.writers()?.refs, reference)
    }

    fn commit_files(&mut self, file: &CommitFile) -> Result<()> {
        write_line(&mut self.writers()?.commit_files, file)
    }

    fn commit_parents(&mut self, links: &[CommitParent]) -> Result<()> {
        let out = &mut self.writers()?.commit_parents;
        for link in links {
            write_line(out, link)?;
        }
        Ok(())
    }

    fn commit_file_components(&mut self, component: &CommitFileComponent) -> Result<()> {
        write_line(&mut self.writers()?.commit_file_components, component)
    }

    fn commit_line_change(&mut self, change: &CommitLineChange) -> Result<()> {
        write_line(&mut self.writers()?.commit_line_changes, change)
    }

    fn clear_repo_snapshot(&mut self, repo_id: &str) -> Result<()> {
        // The snapshot file only ever holds this store's repository.
        let path = self.dir.join(SNAPSHOT_FILE);
        let writers = self.writers()?;
        let fresh = BufWriter::new(File::create(path)?);
        // Discard rows still buffered for the truncated file.
        let (_, _discarded) = std::mem::replace(&mut writers.repo_snapshot, fresh).into_parts();
        tracing::debug!("Cleared snapshot rows of {}", repo_id);
        Ok(())
    }

    fn repo_snapshot(&mut self, row: &RepoSnapshot) -> Result<()> {
        write_line(&mut self.writers()?.repo_snapshot, row)
    }

    fn close(&mut self) -> Result<()> {
        let mut writers = self
            .writers
            .take()
            .ok_or_else(|| ExtractorError::Store("store already closed".to_string()))?;
        for out in writers.all() {
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RefKind;
    use tempfile::tempdir;

    #[test]
    fn test_writes_one_line_per_record() {
        let dir = tempdir().unwrap();
        let mut store = JsonLinesStore::create(dir.path()).unwrap();
        store
            .refs(&Ref::new("repo", "main", "abc".into(), RefKind::Branch, true))
            .unwrap();
        store
            .refs(&Ref::new("repo", "dev", "def".into(), RefKind::Branch, false))
            .unwrap();
        store.close().unwrap();

        let content = fs::read_to_string(dir.path().join("refs.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Ref = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.id, "repo:main");
        assert!(first.is_default);
    }

    #[test]
    fn test_clear_snapshot_truncates_file() {
        let dir = tempdir().unwrap();
        let mut store = JsonLinesStore::create(dir.path()).unwrap();
        let row = RepoSnapshot {
            repo_id: "repo".into(),
            file_path: "a.txt".into(),
            line_no: 1,
            commit_sha: "abc".into(),
        };
        store.repo_snapshot(&row).unwrap();
        store.clear_repo_snapshot("repo").unwrap();
        store.repo_snapshot(&row).unwrap();
        store.close().unwrap();

        let content = fs::read_to_string(dir.path().join(SNAPSHOT_FILE)).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_second_close_is_an_error() {
        let dir = tempdir().unwrap();
        let mut store = JsonLinesStore::create(dir.path()).unwrap();
        store.close().unwrap();
        assert!(store.close().is_err());
    }
}
