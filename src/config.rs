//! Extraction options and incremental-sync bookkeeping.
//!
//! - `ExtractorOptions`: everything one run needs, built by the CLI or an embedder
//! - `SyncConfig`: the subset of options whose change forces a full resync
//! - `SyncState` / `SyncStateFile`: the "since" timestamp of the last
//!   successful run, remembered together with the config fingerprint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::git::ComponentTable;

/// Which commit-graph reader backs the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// libgit2 through the `git2` crate.
    #[default]
    Libgit2,
    /// `git` command line plumbing, no native library involved.
    GitCli,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
    /// PEM text, or base64 of it.
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

impl Credentials {
    /// Values that must never appear in logs or error messages.
    pub fn secrets(&self) -> Vec<String> {
        [&self.password, &self.private_key, &self.passphrase]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub url: String,
    pub repo_id: String,
    pub credentials: Credentials,
    pub proxy: Option<String>,
    pub insecure_skip_verify: bool,
    pub backend: Backend,
    pub skip_commit_stat: bool,
    pub skip_commit_files: bool,
    pub no_shallow_clone: bool,
    /// Only used when no valid sync state exists.
    pub time_after: Option<DateTime<Utc>>,
    /// `None` lets the acquirer guess from the remote host.
    pub shallow_supported: Option<bool>,
    pub components: ComponentTable,
}

impl ExtractorOptions {
    pub fn new(url: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            repo_id: repo_id.into(),
            credentials: Credentials::default(),
            proxy: None,
            insecure_skip_verify: false,
            backend: Backend::default(),
            skip_commit_stat: false,
            skip_commit_files: false,
            no_shallow_clone: false,
            time_after: None,
            shallow_supported: None,
            components: ComponentTable::default(),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            use_git_cli: self.backend == Backend::GitCli,
            skip_commit_stat: self.skip_commit_stat,
            skip_commit_files: self.skip_commit_files,
            no_shallow_clone: self.no_shallow_clone,
        }
    }

    /// The incremental starting point for this run, or `None` for a full sync.
    pub fn effective_since(&self, state: Option<&SyncState>) -> Option<DateTime<Utc>> {
        if self.no_shallow_clone {
            return None;
        }
        let config = self.sync_config();
        match state {
            Some(state) if state.since.is_some() => state.effective_since(&config),
            _ => self.time_after,
        }
    }
}

/// Options that change what a run collects. When any of them differs from
/// the previous run, the stored "since" is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub use_git_cli: bool,
    pub skip_commit_stat: bool,
    pub skip_commit_files: bool,
    pub no_shallow_clone: bool,
}

impl SyncConfig {
    pub fn fingerprint(&self) -> String {
        // Struct fields serialize in declaration order, so the JSON is stable.
        let json = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&json))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub since: Option<DateTime<Utc>>,
    pub config_fingerprint: Option<String>,
}

impl SyncState {
    pub fn recorded(config: &SyncConfig, at: DateTime<Utc>) -> Self {
        Self {
            since: Some(at),
            config_fingerprint: Some(config.fingerprint()),
        }
    }

    pub fn config_changed(&self, config: &SyncConfig) -> bool {
        self.config_fingerprint.as_deref() != Some(config.fingerprint().as_str())
    }

    /// A changed configuration counts as "no since".
    pub fn effective_since(&self, config: &SyncConfig) -> Option<DateTime<Utc>> {
        if self.config_changed(config) {
            tracing::info!("Sync configuration changed since the last run, forcing full sync");
            None
        } else {
            self.since
        }
    }
}

/// JSON file mapping repo id to its `SyncState`.
#[derive(Debug, Default)]
pub struct SyncStateFile {
    path: PathBuf,
    states: BTreeMap<String, SyncState>,
}

impl SyncStateFile {
    /// Loads the file; a missing file is an empty state.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let states = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, states })
    }

    pub fn get(&self, repo_id: &str) -> Option<&SyncState> {
        self.states.get(repo_id)
    }

    pub fn set(&mut self, repo_id: &str, state: SyncState) {
        self.states.insert(repo_id.to_string(), state);
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.states)?)?;
        Ok(())
    }
}
