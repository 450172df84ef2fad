//! Git history mining.
//!
//! Acquires a repository (clone, shallow clone or local path), then walks its
//! object database and HEAD history to emit commits, refs, per-file
//! statistics, line changes and a line ownership snapshot into a [`Store`].
//!
//! [`Store`]: store::Store

pub mod acquire;
pub mod config;
pub mod error;
pub mod extractor;
pub mod git;
pub mod models;
pub mod store;

pub use config::{Backend, Credentials, ExtractorOptions, SyncState, SyncStateFile};
pub use error::{ExtractorError, Result};
pub use extractor::{RunOutcome, RunSummary, run, run_with_handle};
