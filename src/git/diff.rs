//! Diff results shared by both backends, plus component classification.
//!
//! Backends reduce a tree-to-tree diff to two shapes:
//! - `FileStat`: added/deleted line counts of one path (commit statistics)
//! - `FileLineChanges`: the individual added/deleted lines (blame replay)
//!
//! The libgit2 reduction lives here; the command line one lives in `cli.rs`.

use git2::{Delta, Diff, DiffOptions, Patch};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, check_cancelled};
use crate::models::{CommitFile, CommitFileComponent, LineChangeKind, DEFAULT_COMPONENT};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub path: String,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineChange {
    pub kind: LineChangeKind,
    pub old_lineno: Option<u32>,
    pub new_lineno: Option<u32>,
    /// 1-based hunk index within the file
    pub hunk: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLineChanges {
    /// `None` when the file was added
    pub old_path: Option<String>,
    /// `None` when the file was deleted
    pub new_path: Option<String>,
    pub lines: Vec<LineChange>,
}

impl FileLineChanges {
    /// Path the blame state of this file is tracked under.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }
}

/// Ordered component table; the first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct ComponentTable {
    entries: Vec<(String, Regex)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentDef {
    name: String,
    path_regex: String,
}

impl ComponentTable {
    pub fn new<I, N, P>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, pattern)| Ok((name.into(), Regex::new(pattern.as_ref())?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Reads `[{"name": "...", "pathRegex": "..."}]`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let defs: Vec<ComponentDef> = serde_json::from_str(&contents)?;
        Self::new(defs.into_iter().map(|d| (d.name, d.path_regex)))
    }

    pub fn classify(&self, path: &str) -> &str {
        self.entries
            .iter()
            .find(|(_, pattern)| pattern.is_match(path))
            .map(|(name, _)| name.as_str())
            .unwrap_or(DEFAULT_COMPONENT)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Emits one CommitFile and its CommitFileComponent per changed path.
pub fn record_commit_files(
    store: &mut dyn Store,
    commit_sha: &str,
    stats: &[FileStat],
    components: &ComponentTable,
) -> Result<()> {
    for stat in stats {
        let file = CommitFile::new(commit_sha, &stat.path, stat.additions, stat.deletions);
        let component = CommitFileComponent {
            commit_file_id: file.id.clone(),
            component_name: components.classify(&file.file_path).to_string(),
        };
        store.commit_files(&file)?;
        store.commit_file_components(&component)?;
    }
    Ok(())
}

pub fn diff_options() -> DiffOptions {
    let mut opts = DiffOptions::new();
    opts.ignore_submodules(true)
        .context_lines(0)
        .indent_heuristic(false);
    opts
}

fn delta_paths(delta: &git2::DiffDelta<'_>) -> (Option<String>, Option<String>) {
    let path_of = |p: Option<&Path>| p.map(|p| p.to_string_lossy().to_string());
    let old_path = path_of(delta.old_file().path());
    let new_path = path_of(delta.new_file().path());
    match delta.status() {
        Delta::Added => (None, new_path),
        Delta::Deleted => (old_path, None),
        _ => (old_path, new_path),
    }
}

/// Per-file addition/deletion counts of a libgit2 diff. Binary files count 0/0.
pub fn file_stats(diff: &Diff<'_>) -> Result<Vec<FileStat>> {
    let mut stats = Vec::with_capacity(diff.deltas().len());
    for (delta_idx, delta) in diff.deltas().enumerate() {
        let (old_path, new_path) = delta_paths(&delta);
        let Some(path) = new_path.or(old_path) else {
            continue;
        };
        let (additions, deletions) = match Patch::from_diff(diff, delta_idx)? {
            Some(patch) => {
                let (_, additions, deletions) = patch.line_stats()?;
                (additions, deletions)
            }
            None => (0, 0),
        };
        stats.push(FileStat {
            path,
            additions,
            deletions,
        });
    }
    Ok(stats)
}

/// Added and deleted lines of every file in a libgit2 diff.
pub fn line_changes(diff: &Diff<'_>, cancel: &CancellationToken) -> Result<Vec<FileLineChanges>> {
    let mut files = Vec::with_capacity(diff.deltas().len());
    for (delta_idx, delta) in diff.deltas().enumerate() {
        check_cancelled(cancel)?;
        let (old_path, new_path) = delta_paths(&delta);
        let mut changes = FileLineChanges {
            old_path,
            new_path,
            lines: Vec::new(),
        };

        if let Some(patch) = Patch::from_diff(diff, delta_idx)? {
            for hunk_idx in 0..patch.num_hunks() {
                for line_idx in 0..patch.num_lines_in_hunk(hunk_idx)? {
                    let line = patch.line_in_hunk(hunk_idx, line_idx)?;
                    let kind = match line.origin() {
                        '+' => LineChangeKind::Added,
                        '-' => LineChangeKind::Deleted,
                        _ => continue,
                    };
                    changes.lines.push(LineChange {
                        kind,
                        old_lineno: line.old_lineno(),
                        new_lineno: line.new_lineno(),
                        hunk: hunk_idx as u32 + 1,
                    });
                }
            }
        }

        files.push(changes);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_first_matching_component_wins() {
        let table = ComponentTable::new([
            ("frontend", r"^web/"),
            ("tests", r"_test\."),
            ("everything", r".*"),
        ])
        .unwrap();
        assert_eq!(table.classify("web/app_test.js"), "frontend");
        assert_eq!(table.classify("src/lib_test.rs"), "tests");
        assert_eq!(table.classify("README.md"), "everything");
    }

    #[test]
    fn test_unmatched_path_gets_default_component() {
        let table = ComponentTable::new([("backend", r"^server/")]).unwrap();
        assert_eq!(table.classify("docs/index.md"), DEFAULT_COMPONENT);
        assert_eq!(ComponentTable::default().classify("x"), DEFAULT_COMPONENT);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(ComponentTable::new([("broken", "(")]).is_err());
    }

    #[test]
    fn test_component_file_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.json");
        std::fs::write(
            &path,
            r#"[{"name": "b", "pathRegex": "^src/"}, {"name": "a", "pathRegex": "\\.rs$"}]"#,
        )
        .unwrap();
        let table = ComponentTable::from_json_file(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.classify("src/main.rs"), "b");
        assert_eq!(table.classify("build.rs"), "a");
    }

    #[test]
    fn test_record_commit_files_links_components() {
        let table = ComponentTable::new([("docs", r"\.md$")]).unwrap();
        let mut store = MemoryStore::new();
        let stats = vec![
            FileStat {
                path: "README.md".into(),
                additions: 3,
                deletions: 1,
            },
            FileStat {
                path: "src/lib.rs".into(),
                additions: 10,
                deletions: 0,
            },
        ];
        record_commit_files(&mut store, "abc", &stats, &table).unwrap();

        assert_eq!(store.commit_files.len(), 2);
        for file in store.commit_files.values() {
            let component = &store.commit_file_components[&file.id];
            let expected = if file.file_path == "README.md" { "docs" } else { DEFAULT_COMPONENT };
            assert_eq!(component.component_name, expected);
        }
    }

    #[test]
    fn test_line_changes_path_prefers_new_path() {
        let deleted = FileLineChanges {
            old_path: Some("gone.txt".into()),
            new_path: None,
            lines: vec![],
        };
        assert_eq!(deleted.path(), "gone.txt");
    }
}
