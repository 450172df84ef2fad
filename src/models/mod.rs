//! Records emitted by the extractor.
//!
//! Every record is write-once and is pushed to a `Store`.
//! - `commit`: Commit, Signature, CommitParent, RepoCommit
//! - `refs`: Ref and RefKind for branches and tags
//! - `diff`: CommitFile, CommitFileComponent, CommitLineChange
//! - `blame`: RepoSnapshot line ownership rows

pub mod blame;
pub mod commit;
pub mod diff;
pub mod refs;

pub use blame::*;
pub use commit::*;
pub use diff::*;
pub use refs::*;
