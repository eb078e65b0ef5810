//! In-memory repository host for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{HostError, PullRequest, RepositoryHost};
use crate::domain::{CommitRecord, RepoId};

/// Host operation a test can make fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    ListCommits,
    GetRef,
    CreateRef,
    WriteFile,
    PullRequest,
}

/// A call recorded by [`MockHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    ListCommits { repo: String, path: String },
    GetRef { repo: String, branch: String },
    CreateRef { repo: String, branch: String, sha: String },
    WriteFile { repo: String, path: String, branch: String, content: String },
    PullRequest { repo: String, head: String, base: String, title: String, body: String },
}

/// Mock host with canned commits, known branches and injectable failures
///
/// `list_commits` returns commits dated at or after `since`, mimicking a
/// host whose filter is inclusive.
pub struct MockHost {
    commits: Mutex<HashMap<(String, String), Vec<CommitRecord>>>,
    branches: Mutex<HashSet<(String, String)>>,
    fail_on: Mutex<Option<FailPoint>>,
    refs_exist: Mutex<bool>,
    calls: Mutex<Vec<HostCall>>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        debug!("MockHost::new: called");
        Self {
            commits: Mutex::new(HashMap::new()),
            branches: Mutex::new(HashSet::new()),
            fail_on: Mutex::new(None),
            refs_exist: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn add_commit(&self, repo: &RepoId, path: &str, commit: CommitRecord) {
        self.commits
            .lock()
            .unwrap()
            .entry((repo.to_string(), path.to_string()))
            .or_default()
            .push(commit);
    }

    pub fn add_branch(&self, repo: &RepoId, branch: &str) {
        self.branches.lock().unwrap().insert((repo.to_string(), branch.to_string()));
    }

    pub fn fail_on(&self, point: Option<FailPoint>) {
        *self.fail_on.lock().unwrap() = point;
    }

    /// Make every `create_ref` fail as if the branch already existed
    pub fn set_refs_exist(&self, exist: bool) {
        *self.refs_exist.lock().unwrap() = exist;
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_branches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::CreateRef { branch, .. } => Some(branch),
                _ => None,
            })
            .collect()
    }

    pub fn pull_requests(&self) -> Vec<HostCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, HostCall::PullRequest { .. }))
            .collect()
    }

    fn check(&self, point: FailPoint) -> Result<(), HostError> {
        if *self.fail_on.lock().unwrap() == Some(point) {
            debug!(?point, "MockHost: injected failure");
            return Err(HostError::Api {
                status: 500,
                message: format!("injected failure at {:?}", point),
            });
        }
        Ok(())
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RepositoryHost for MockHost {
    async fn list_commits(
        &self,
        repo: &RepoId,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CommitRecord>, HostError> {
        self.record(HostCall::ListCommits {
            repo: repo.to_string(),
            path: path.to_string(),
        });
        self.check(FailPoint::ListCommits)?;
        let commits = self.commits.lock().unwrap();
        Ok(commits
            .get(&(repo.to_string(), path.to_string()))
            .map(|list| list.iter().filter(|c| c.author_date >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_ref(&self, repo: &RepoId, branch: &str) -> Result<String, HostError> {
        self.record(HostCall::GetRef {
            repo: repo.to_string(),
            branch: branch.to_string(),
        });
        self.check(FailPoint::GetRef)?;
        if self.branches.lock().unwrap().contains(&(repo.to_string(), branch.to_string())) {
            Ok(format!("sha-{}", branch))
        } else {
            Err(HostError::NotFound(format!("branch '{}' in {}", branch, repo)))
        }
    }

    async fn create_ref(&self, repo: &RepoId, branch: &str, sha: &str) -> Result<(), HostError> {
        self.record(HostCall::CreateRef {
            repo: repo.to_string(),
            branch: branch.to_string(),
            sha: sha.to_string(),
        });
        self.check(FailPoint::CreateRef)?;
        if *self.refs_exist.lock().unwrap()
            || !self.branches.lock().unwrap().insert((repo.to_string(), branch.to_string()))
        {
            return Err(HostError::Api {
                status: 422,
                message: "Reference already exists".to_string(),
            });
        }
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        repo: &RepoId,
        path: &str,
        content: &str,
        branch: &str,
        _message: &str,
    ) -> Result<(), HostError> {
        self.record(HostCall::WriteFile {
            repo: repo.to_string(),
            path: path.to_string(),
            branch: branch.to_string(),
            content: content.to_string(),
        });
        self.check(FailPoint::WriteFile)
    }

    async fn create_pull_request(
        &self,
        repo: &RepoId,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError> {
        self.record(HostCall::PullRequest {
            repo: repo.to_string(),
            head: head.to_string(),
            base: base.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        self.check(FailPoint::PullRequest)?;
        let number = self.pull_requests().len() as u64;
        Ok(PullRequest {
            number,
            url: format!("https://host/{}/pull/{}", repo, number),
        })
    }
}
