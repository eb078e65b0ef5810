//! Repository host capability
//!
//! The engine only talks to the remote service through [`RepositoryHost`].
//! [`GitHubHost`] implements it over the GitHub REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CommitRecord, RepoId};

mod error;
mod github;
#[cfg(test)]
pub mod mock;

pub use error::HostError;
pub use github::GitHubHost;

/// A pull request created on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

/// Commit history, branch, file-write and pull-request operations
///
/// Every call is a single attempt; callers decide what a failure means.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Commits touching `path` since `since`, consuming every page
    async fn list_commits(
        &self,
        repo: &RepoId,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CommitRecord>, HostError>;

    /// SHA at the tip of `branch`
    async fn get_ref(&self, repo: &RepoId, branch: &str) -> Result<String, HostError>;

    /// Create `branch` pointing at `sha`
    async fn create_ref(&self, repo: &RepoId, branch: &str, sha: &str) -> Result<(), HostError>;

    /// Create or overwrite `path` on `branch` with `content`
    async fn create_or_update_file(
        &self,
        repo: &RepoId,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), HostError>;

    /// Open a pull request from `head` into `base`
    async fn create_pull_request(
        &self,
        repo: &RepoId,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError>;
}
