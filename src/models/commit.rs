use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: DateTime<FixedOffset>,
}

impl Signature {
    /// Builds a signature from a unix timestamp and a UTC offset in minutes.
    /// Out-of-range values fall back to the epoch in UTC.
    pub fn from_raw(name: &str, email: &str, seconds: i64, offset_minutes: i32) -> Self {
        let when = FixedOffset::east_opt(offset_minutes * 60)
            .and_then(|tz| tz.timestamp_opt(seconds, 0).single())
            .unwrap_or_else(|| DateTime::<Utc>::default().fixed_offset());
        Self {
            name: name.to_string(),
            email: email.to_string(),
            when,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
    pub additions: usize,
    pub deletions: usize,
    /// Parent shas in commit order, including parents absent from the object database.
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitParent {
    pub commit_sha: String,
    pub parent_commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoCommit {
    pub repo_id: String,
    pub commit_sha: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_keeps_offset() {
        let sig = Signature::from_raw("Ada", "ada@example.com", 1_700_000_000, 120);
        assert_eq!(sig.when.timestamp(), 1_700_000_000);
        assert_eq!(sig.when.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_signature_bad_offset_falls_back_to_epoch() {
        let sig = Signature::from_raw("Ada", "ada@example.com", 42, 100_000);
        assert_eq!(sig.when.timestamp(), 0);
    }
}
