//! One extraction run, end to end.
//!
//! acquire -> open collector -> tags -> branches -> commits -> diff lines
//!
//! Whatever happens, the store is closed exactly once and the repository
//! handle is released before `run` returns.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::acquire::{AcquireRequest, RepositoryHandle, acquire};
use crate::config::{ExtractorOptions, SyncState};
use crate::error::{Result, check_cancelled};
use crate::git::{CollectorConfig, RepoCollector, open_collector};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub since: Option<DateTime<Utc>>,
    pub tags: usize,
    pub branches: usize,
    pub commits: usize,
}

impl RunSummary {
    /// State to hand to the next run of the same repository.
    pub fn next_state(&self, options: &ExtractorOptions) -> SyncState {
        SyncState::recorded(&options.sync_config(), self.started_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The remote had nothing to collect; nothing downstream ran.
    NoData,
}

/// Acquires `options.url` and extracts everything into `store`.
pub fn run(
    options: &ExtractorOptions,
    state: Option<&SyncState>,
    store: &mut dyn Store,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let started_at = Utc::now();
    let since = options.effective_since(state);
    let request = AcquireRequest::from_options(options, since);
    let result = acquire(&request, cancel)
        .and_then(|handle| extract(handle, options, since, started_at, store, cancel));
    finish(result, store)
}

/// Extracts from an already materialized repository.
pub fn run_with_handle(
    handle: RepositoryHandle,
    options: &ExtractorOptions,
    store: &mut dyn Store,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let result = extract(handle, options, None, Utc::now(), store, cancel);
    finish(result, store)
}

fn finish(result: Result<RunSummary>, store: &mut dyn Store) -> Result<RunOutcome> {
    let closed = store.close();
    match (result, closed) {
        (Ok(summary), Ok(())) => Ok(RunOutcome::Completed(summary)),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) if e.is_no_data() => {
            info!("{}", e);
            Ok(RunOutcome::NoData)
        }
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!("Failed to close store after error: {}", close_err);
            }
            Err(e)
        }
    }
}

fn extract(
    handle: RepositoryHandle,
    options: &ExtractorOptions,
    since: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    store: &mut dyn Store,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let mut collector =
        open_collector(options.backend, handle, CollectorConfig::from_options(options))?;
    let result = collect(collector.as_ref(), options, store, cancel);
    let released = collector.close();
    let (tags, branches, commits) = result?;
    released?;
    Ok(RunSummary {
        started_at,
        since,
        tags,
        branches,
        commits,
    })
}

fn collect(
    collector: &dyn RepoCollector,
    options: &ExtractorOptions,
    store: &mut dyn Store,
    cancel: &CancellationToken,
) -> Result<(usize, usize, usize)> {
    let tags = collector.count_tags(cancel)?;
    info!("Collecting {} tags", tags);
    collector.collect_tags(cancel, store)?;

    let branches = collector.count_branches(cancel)?;
    info!("Collecting {} branches", branches);
    collector.collect_branches(cancel, store)?;

    let commits = collector.count_commits(cancel)?;
    collector.collect_commits(cancel, store)?;

    if options.skip_commit_stat {
        info!("Skipping diff lines and snapshot");
    } else {
        check_cancelled(cancel)?;
        collector.collect_diff_lines(cancel, store)?;
    }
    Ok((tags, branches, commits))
}
