//! Commit scanner
//!
//! Finds the commits touching a watched file that are strictly newer than a
//! watermark.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::domain::{CommitRecord, RepoId};
use crate::host::{HostError, RepositoryHost};

/// Scan failure; the pair is skipped for this cycle
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to list commits for {path} in {repo}: {source}")]
    RemoteQuery {
        repo: RepoId,
        path: String,
        #[source]
        source: HostError,
    },
}

pub struct CommitScanner {
    host: Arc<dyn RepositoryHost>,
}

impl CommitScanner {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self { host }
    }

    /// Commits touching `path` with an author date strictly after `since`
    ///
    /// The host's own `since` filter may be inclusive, so the strict bound is
    /// enforced here. Results are ordered oldest first. An empty vector means
    /// nothing new.
    pub async fn scan(&self, repo: &RepoId, path: &str, since: DateTime<Utc>) -> Result<Vec<CommitRecord>, ScanError> {
        debug!(%repo, %path, %since, "CommitScanner::scan: called");
        let commits = self
            .host
            .list_commits(repo, path, since)
            .await
            .map_err(|source| ScanError::RemoteQuery {
                repo: repo.clone(),
                path: path.to_string(),
                source,
            })?;

        let returned = commits.len();
        let fresh = newer_than(commits, since);
        debug!(%repo, %path, returned, fresh = fresh.len(), "CommitScanner::scan: filtered");
        Ok(fresh)
    }
}

/// Keep commits strictly after `since`, oldest first
pub fn newer_than(commits: Vec<CommitRecord>, since: DateTime<Utc>) -> Vec<CommitRecord> {
    let mut fresh: Vec<CommitRecord> = commits.into_iter().filter(|c| c.author_date > since).collect();
    fresh.sort_by_key(|c| c.author_date);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::{FailPoint, MockHost};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn commit(sha: &str, date: DateTime<Utc>) -> CommitRecord {
        CommitRecord::new(sha, format!("commit {}", sha), date, format!("https://host/c/{}", sha))
    }

    #[tokio::test]
    async fn test_scan_excludes_commit_at_watermark() {
        let repo = RepoId::new("up", "lib");
        let host = Arc::new(MockHost::new());
        host.add_commit(&repo, "f.md", commit("old", at(1)));
        host.add_commit(&repo, "f.md", commit("new", at(2)));

        let scanner = CommitScanner::new(host);
        let commits = scanner.scan(&repo, "f.md", at(1)).await.unwrap();

        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, "new");
    }

    #[tokio::test]
    async fn test_scan_empty_is_not_an_error() {
        let repo = RepoId::new("up", "lib");
        let scanner = CommitScanner::new(Arc::new(MockHost::new()));
        let commits = scanner.scan(&repo, "f.md", at(1)).await.unwrap();
        assert!(commits.is_empty());
    }

    #[tokio::test]
    async fn test_scan_orders_oldest_first() {
        let repo = RepoId::new("up", "lib");
        let host = Arc::new(MockHost::new());
        host.add_commit(&repo, "f.md", commit("c3", at(5)));
        host.add_commit(&repo, "f.md", commit("c1", at(3)));
        host.add_commit(&repo, "f.md", commit("c2", at(4)));

        let commits = CommitScanner::new(host).scan(&repo, "f.md", at(1)).await.unwrap();
        let shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn test_scan_host_failure_is_remote_query_error() {
        let repo = RepoId::new("up", "lib");
        let host = Arc::new(MockHost::new());
        host.fail_on(Some(FailPoint::ListCommits));

        let err = CommitScanner::new(host).scan(&repo, "f.md", at(1)).await.unwrap_err();
        assert!(matches!(err, ScanError::RemoteQuery { .. }));
        assert!(err.to_string().contains("up/lib"));
    }

    proptest! {
        #[test]
        fn prop_nothing_at_or_before_since_survives(
            offsets in proptest::collection::vec(-1_000i64..1_000, 0..50),
            since_offset in -500i64..500,
        ) {
            let base = at(10);
            let since = base + Duration::seconds(since_offset);
            let commits: Vec<CommitRecord> = offsets
                .iter()
                .enumerate()
                .map(|(i, off)| commit(&i.to_string(), base + Duration::seconds(*off)))
                .collect();
            let expected = commits.iter().filter(|c| c.author_date > since).count();

            let fresh = newer_than(commits, since);
            prop_assert_eq!(fresh.len(), expected);
            prop_assert!(fresh.iter().all(|c| c.author_date > since));
            prop_assert!(fresh.windows(2).all(|w| w[0].author_date <= w[1].author_date));
        }
    }
}
