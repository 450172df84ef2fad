//! Repository acquisition.
//!
//! Turns a url into a local repository the collectors can read:
//! - local paths and `file://` urls are opened in place and never deleted
//! - remotes are bare-cloned into a temporary directory owned by the
//!   returned `RepositoryHandle`
//!
//! Incremental runs clone shallowly from the "since" timestamp, falling back
//! to a double clone for remotes that reject shallow fetches.

pub mod transport;

pub use transport::{Transport, TransportSetup};

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Backend, Credentials, ExtractorOptions};
use crate::error::{ExtractorError, Result};
use crate::git::exec::{GitCommand, git_in};

/// stderr lines meaning the remote has nothing for us.
const NO_DATA_MARKERS: &[&str] = &[
    "fatal: error processing shallow info: 4",
    "fatal: the remote end hung up unexpectedly",
];

/// stderr fragments of a transport that cannot do shallow fetches.
const SHALLOW_REJECTED_MARKERS: &[&str] = &[
    "does not support shallow",
    "shallow capabilities",
];

/// A repository on local disk. Ephemeral handles own their directory and
/// remove it on `release` or drop.
#[derive(Debug)]
pub struct RepositoryHandle {
    path: PathBuf,
    workdir: Option<TempDir>,
}

impl RepositoryHandle {
    /// A caller-owned repository; releasing it leaves the files alone.
    pub fn local<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            workdir: None,
        }
    }

    /// A repository inside `workdir`, which is removed on release.
    pub fn ephemeral(workdir: TempDir, path: PathBuf) -> Self {
        Self {
            path,
            workdir: Some(workdir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_ephemeral(&self) -> bool {
        self.workdir.is_some()
    }

    /// Removes the temporary directory, if this handle owns one.
    pub fn release(self) -> Result<()> {
        if let Some(workdir) = self.workdir {
            let dir = workdir.path().to_path_buf();
            workdir.close()?;
            debug!("Removed {:?}", dir);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub url: String,
    pub credentials: Credentials,
    pub proxy: Option<String>,
    pub insecure_skip_verify: bool,
    /// Incremental starting point. `None` means a full clone.
    pub since: Option<DateTime<Utc>>,
    /// `None` guesses from the remote host.
    pub shallow_supported: Option<bool>,
    /// Full clones skip blobs; set when no diff is needed and the reader can
    /// cope with a partial clone.
    pub blob_filter: bool,
}

impl AcquireRequest {
    pub fn from_options(options: &ExtractorOptions, since: Option<DateTime<Utc>>) -> Self {
        Self {
            url: options.url.clone(),
            credentials: options.credentials.clone(),
            proxy: options.proxy.clone(),
            insecure_skip_verify: options.insecure_skip_verify,
            since,
            shallow_supported: options.shallow_supported,
            // libgit2 refuses repositories with the partialclone extension.
            blob_filter: options.skip_commit_stat
                && options.skip_commit_files
                && options.backend == Backend::GitCli,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStrategy {
    Full { blob_filter: bool },
    Shallow { since: DateTime<Utc> },
    /// Full clone into a throwaway directory, then a shallow clone of that.
    DoubleClone { since: DateTime<Utc> },
}

impl CloneStrategy {
    pub fn select(
        since: Option<DateTime<Utc>>,
        shallow_supported: bool,
        blob_filter: bool,
    ) -> Self {
        match since {
            None => CloneStrategy::Full { blob_filter },
            Some(since) if shallow_supported => CloneStrategy::Shallow { since },
            Some(since) => CloneStrategy::DoubleClone { since },
        }
    }
}

fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn stderr_contains(err: &ExtractorError, markers: &[&str]) -> bool {
    match err {
        ExtractorError::GitCommand { stderr, .. } => markers.iter().any(|m| stderr.contains(m)),
        _ => false,
    }
}

/// The strategy to retry with after `strategy` failed with `err`, if any.
/// Only a shallow clone the remote refuses falls back to a double clone.
fn fallback_strategy(strategy: CloneStrategy, err: &ExtractorError) -> Option<CloneStrategy> {
    match strategy {
        CloneStrategy::Shallow { since } if stderr_contains(err, SHALLOW_REJECTED_MARKERS) => {
            Some(CloneStrategy::DoubleClone { since })
        }
        _ => None,
    }
}

/// Maps the remote's "nothing to send" failures to `NoData`.
fn classify(err: ExtractorError) -> ExtractorError {
    if stderr_contains(&err, NO_DATA_MARKERS) {
        ExtractorError::NoData(err.to_string())
    } else {
        err
    }
}

fn network(setup: &TransportSetup, args: &[&str]) -> GitCommand {
    GitCommand::new(setup.args(args.iter().copied()))
        .envs(&setup.env)
        .secrets(&setup.secrets)
}

/// Whether the repository has at least one ref.
pub fn has_refs(dir: &Path, cancel: &CancellationToken) -> Result<bool> {
    let out = git_in(dir, &["for-each-ref", "--count=1"], cancel)?;
    Ok(!out.stdout.iter().all(u8::is_ascii_whitespace))
}

/// Clones `setup.url` into `dest` (a bare repository) using `strategy`, then
/// deepens shallow results by one commit.
pub fn materialize(
    strategy: CloneStrategy,
    setup: &TransportSetup,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let dest_arg = dest.to_string_lossy().to_string();
    match strategy {
        CloneStrategy::Full { blob_filter } => {
            let mut args = vec!["clone", "--bare"];
            if blob_filter {
                args.push("--filter=blob:none");
            }
            args.extend([setup.url.as_str(), dest_arg.as_str()]);
            network(setup, &args).run(cancel).map_err(classify)?;
        }
        CloneStrategy::Shallow { since } => {
            let args = ["clone", "--bare", "--depth=1", setup.url.as_str(), dest_arg.as_str()];
            network(setup, &args)
                .run(cancel)
                .map_err(classify)?;
            if has_refs(dest, cancel)? {
                git_in(
                    dest,
                    &["config", "remote.origin.fetch", "+refs/heads/*:refs/heads/*"],
                    cancel,
                )?;
                let shallow_since = format!("--shallow-since={}", rfc3339(&since));
                for fetch in [
                    vec!["fetch", "--depth=1", "origin"],
                    vec!["fetch", shallow_since.as_str(), "origin"],
                ] {
                    if let Err(e) = network(setup, &fetch).current_dir(dest).run(cancel) {
                        if e.is_cancelled() {
                            return Err(e);
                        }
                        warn!("git {} failed: {}", fetch.join(" "), e);
                    }
                }
                deepen(setup, dest, cancel)?;
            }
        }
        CloneStrategy::DoubleClone { since } => {
            let intermediary = tempfile::Builder::new()
                .prefix("git-extractor-full-")
                .tempdir()?;
            let full = intermediary.path().join("repo.git");
            materialize(CloneStrategy::Full { blob_filter: false }, setup, &full, cancel)?;

            let local = TransportSetup::plain(format!("file://{}", full.to_string_lossy()));
            let shallow_since = format!("--shallow-since={}", rfc3339(&since));
            let args = [
                "clone",
                "--bare",
                shallow_since.as_str(),
                local.url.as_str(),
                dest_arg.as_str(),
            ];
            network(&local, &args)
                .run(cancel)
                .map_err(classify)?;
            // The origin of `dest` is the intermediary, which must outlive this.
            if has_refs(dest, cancel)? {
                deepen(&local, dest, cancel)?;
            }
            intermediary.close()?;
        }
    }
    Ok(())
}

fn deepen(setup: &TransportSetup, dest: &Path, cancel: &CancellationToken) -> Result<()> {
    git_in(dest, &["repack", "-d"], cancel)?;
    if let Err(e) = network(setup, &["fetch", "--deepen=1", "origin"])
        .current_dir(dest)
        .run(cancel)
    {
        if e.is_cancelled() {
            return Err(e);
        }
        error!("Failed to deepen the cloned repo: {}", e);
    }
    Ok(())
}

/// Produces a readable local repository for `request.url`.
///
/// Returns `NoData` when the remote has nothing to collect; the temporary
/// directory is already gone by then.
pub fn acquire(request: &AcquireRequest, cancel: &CancellationToken) -> Result<RepositoryHandle> {
    let transport = Transport::parse(&request.url)?;

    if let Transport::Local(path) = &transport {
        if request.since.is_some() {
            debug!("Local repository is read in place, ignoring since");
        }
        info!("Opening local repository {:?}", path);
        if !has_refs(path, cancel)? {
            return Err(ExtractorError::NoData(format!("{:?} has no refs", path)));
        }
        return Ok(RepositoryHandle::local(path));
    }

    let setup = transport.prepare(
        &request.credentials,
        request.proxy.as_deref(),
        request.insecure_skip_verify,
        cancel,
    )?;
    let shallow_supported = request
        .shallow_supported
        .unwrap_or_else(|| transport.supports_shallow());

    let workdir = tempfile::Builder::new().prefix("git-extractor-").tempdir()?;
    let dest = workdir.path().join("repo.git");

    let mut strategy = CloneStrategy::select(request.since, shallow_supported, request.blob_filter);
    loop {
        info!("Cloning {} using {:?}", setup.url, strategy);
        match materialize(strategy, &setup, &dest, cancel) {
            Ok(()) => break,
            Err(e) => {
                let Some(next) = fallback_strategy(strategy, &e) else {
                    return Err(e);
                };
                warn!("Remote rejected shallow clone, retrying with {:?}: {}", next, e);
                if dest.exists() {
                    std::fs::remove_dir_all(&dest)?;
                }
                strategy = next;
            }
        }
    }

    if !has_refs(&dest, cancel)? {
        return Err(ExtractorError::NoData(format!("{} has no refs", setup.url)));
    }
    debug!("Repository ready at {:?}", dest);
    Ok(RepositoryHandle::ephemeral(workdir, dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_strategy_selection() {
        let since = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(
            CloneStrategy::select(None, true, false),
            CloneStrategy::Full { blob_filter: false }
        );
        assert_eq!(
            CloneStrategy::select(Some(since), true, true),
            CloneStrategy::Shallow { since }
        );
        assert_eq!(
            CloneStrategy::select(Some(since), false, false),
            CloneStrategy::DoubleClone { since }
        );
    }

    #[test]
    fn test_rejected_shallow_clone_falls_back_to_double_clone() {
        let since = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let rejected = ExtractorError::GitCommand {
            args: vec!["clone".into(), "--shallow-since".into()],
            code: Some(128),
            stderr: "fatal: Server does not support shallow clients".into(),
        };
        assert_eq!(
            fallback_strategy(CloneStrategy::Shallow { since }, &rejected),
            Some(CloneStrategy::DoubleClone { since })
        );
        assert_eq!(fallback_strategy(CloneStrategy::DoubleClone { since }, &rejected), None);
        assert_eq!(fallback_strategy(CloneStrategy::Full { blob_filter: false }, &rejected), None);

        let unrelated = ExtractorError::GitCommand {
            args: vec!["clone".into()],
            code: Some(128),
            stderr: "fatal: Authentication failed".into(),
        };
        assert_eq!(fallback_strategy(CloneStrategy::Shallow { since }, &unrelated), None);
        let io = ExtractorError::Io(std::io::Error::other("disk full"));
        assert_eq!(fallback_strategy(CloneStrategy::Shallow { since }, &io), None);
    }

    #[test]
    fn test_no_data_markers() {
        let err = ExtractorError::GitCommand {
            args: vec!["clone".into()],
            code: Some(128),
            stderr: "fatal: error processing shallow info: 4".into(),
        };
        assert!(classify(err).is_no_data());

        let err = ExtractorError::GitCommand {
            args: vec!["clone".into()],
            code: Some(128),
            stderr: "fatal: repository not found".into(),
        };
        assert!(!classify(err).is_no_data());
    }

    #[test]
    fn test_release_removes_only_ephemeral_dirs() {
        let kept = tempfile::tempdir().unwrap();
        RepositoryHandle::local(kept.path()).release().unwrap();
        assert!(kept.path().exists());

        let workdir = tempfile::tempdir().unwrap();
        let root = workdir.path().to_path_buf();
        let handle = RepositoryHandle::ephemeral(workdir, root.join("repo.git"));
        assert!(handle.is_ephemeral());
        handle.release().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_blob_filter_only_when_nothing_is_diffed() {
        let mut options = ExtractorOptions::new("https://example.com/r.git", "r");
        options.skip_commit_stat = true;
        assert!(!AcquireRequest::from_options(&options, None).blob_filter);
        options.skip_commit_files = true;
        assert!(!AcquireRequest::from_options(&options, None).blob_filter);
        options.backend = Backend::GitCli;
        assert!(AcquireRequest::from_options(&options, None).blob_filter);
    }
}
