//! git-extractor - mine a git repository into JSON-lines records
//!
//! # Usage
//! ```bash
//! git-extractor --url https://github.com/org/repo.git --repoId repo-1
//! git-extractor --url git@github.com:org/repo.git --id repo-1 --privateKey "$(base64 -w0 ~/.ssh/id_ed25519)"
//! git-extractor --url /path/to/repo --id local --useGitCli --skipCommitFiles
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use git_extractor::config::{Backend, Credentials, ExtractorOptions, SyncStateFile};
use git_extractor::git::ComponentTable;
use git_extractor::store::JsonLinesStore;
use git_extractor::RunOutcome;

/// Extract commits, refs, file statistics and line ownership from a git repository
#[derive(Parser)]
#[command(name = "git-extractor")]
#[command(about = "Mine git history into JSON-lines records", long_about = None)]
struct Cli {
    /// Repository url: http(s), ssh, scp-like, file:// or a local path
    #[arg(long)]
    url: String,

    /// Id stamped on every record of this repository
    #[arg(long = "repoId", visible_alias = "id")]
    repo_id: String,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// SSH private key, PEM text or base64 of it
    #[arg(long = "privateKey")]
    private_key: Option<String>,

    #[arg(long)]
    passphrase: Option<String>,

    /// HTTP(S) proxy url; for ssh remotes it is reached through corkscrew
    #[arg(long)]
    proxy: Option<String>,

    /// Read the repository with git plumbing commands instead of libgit2
    #[arg(long = "useGitCli")]
    use_git_cli: bool,

    #[arg(long = "skipCommitStat")]
    skip_commit_stat: bool,

    #[arg(long = "skipCommitFiles")]
    skip_commit_files: bool,

    /// Always clone the full history
    #[arg(long = "noShallowClone")]
    no_shallow_clone: bool,

    /// Only collect commits after this RFC3339 time when no sync state exists
    #[arg(long = "timeAfter")]
    time_after: Option<DateTime<Utc>>,

    /// Directory for the JSON-lines output
    #[arg(long, default_value = "./output")]
    output: PathBuf,

    /// JSON file of [{"name": ..., "pathRegex": ...}] component definitions
    #[arg(long)]
    components: Option<PathBuf>,

    /// JSON file keeping the incremental sync state between runs
    #[arg(long = "stateFile")]
    state_file: Option<PathBuf>,

    /// Disable TLS certificate verification for https remotes
    #[arg(long = "insecureSkipVerify")]
    insecure_skip_verify: bool,

    /// Whether the remote serves shallow fetches (guessed from the host when omitted)
    #[arg(long = "shallowSupported")]
    shallow_supported: Option<bool>,
}

impl Cli {
    fn to_options(&self) -> anyhow::Result<ExtractorOptions> {
        let components = match &self.components {
            Some(path) => ComponentTable::from_json_file(path)?,
            None => ComponentTable::default(),
        };
        let mut options = ExtractorOptions::new(&self.url, &self.repo_id);
        options.credentials = Credentials {
            user: self.user.clone(),
            password: self.password.clone(),
            private_key: self.private_key.clone(),
            passphrase: self.passphrase.clone(),
        };
        options.proxy = self.proxy.clone();
        options.insecure_skip_verify = self.insecure_skip_verify;
        options.backend = if self.use_git_cli {
            Backend::GitCli
        } else {
            Backend::Libgit2
        };
        options.skip_commit_stat = self.skip_commit_stat;
        options.skip_commit_files = self.skip_commit_files;
        options.no_shallow_clone = self.no_shallow_clone;
        options.time_after = self.time_after;
        options.shallow_supported = self.shallow_supported;
        options.components = components;
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = cli.to_options()?;
    let mut state_file = cli.state_file.as_ref().map(SyncStateFile::load).transpose()?;
    let state = state_file
        .as_ref()
        .and_then(|file| file.get(&options.repo_id))
        .cloned();
    let store = JsonLinesStore::create(&cli.output)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let run_options = options.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut store = store;
        git_extractor::run(&run_options, state.as_ref(), &mut store, &cancel)
    })
    .await??;

    match outcome {
        RunOutcome::Completed(summary) => {
            info!(
                "Collected {} commits, {} branches and {} tags into {:?}",
                summary.commits, summary.branches, summary.tags, cli.output
            );
            if let Some(file) = state_file.as_mut() {
                file.set(&options.repo_id, summary.next_state(&options));
                file.save()?;
            }
        }
        RunOutcome::NoData => info!("No data to be collected for {}", options.repo_id),
    }
    Ok(())
}
