//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use vigilant::config::WatermarkScope;
use vigilant::history::CycleLog;
use vigilant::host::{HostError, PullRequest, RepositoryHost};
use vigilant::{CommitRecord, RepoId, RepoPair, Scheduler, SchedulerConfig, WatermarkStore};

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

pub fn source() -> RepoId {
    RepoId::new("upstream", "lib")
}

pub fn target() -> RepoId {
    RepoId::new("downstream", "fork")
}

pub fn pair(path: &str) -> RepoPair {
    RepoPair::new(source(), path, target(), "main")
}

pub fn commit(sha: &str, message: &str, date: DateTime<Utc>) -> CommitRecord {
    CommitRecord::new(sha, message, date, format!("https://github.com/upstream/lib/commit/{}", sha))
}

#[derive(Debug, Clone)]
pub struct OpenedPr {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// In-memory host behaving like a small forge
///
/// `list_commits` is inclusive of `since` and can be slowed down to keep a
/// cycle in flight. `fail_pull_requests` makes PR creation fail after the
/// branch and file have been created.
#[derive(Default)]
pub struct FakeHost {
    commits: Mutex<HashMap<String, Vec<CommitRecord>>>,
    branches: Mutex<HashSet<String>>,
    files: Mutex<HashMap<(String, String), String>>,
    prs: Mutex<Vec<OpenedPr>>,
    pub fail_pull_requests: Mutex<bool>,
    pub scan_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub scans: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        let host = Self::default();
        host.branches.lock().unwrap().insert("main".to_string());
        Arc::new(host)
    }

    pub fn push(&self, path: &str, commit: CommitRecord) {
        self.commits.lock().unwrap().entry(path.to_string()).or_default().push(commit);
    }

    pub fn add_branch(&self, branch: &str) {
        self.branches.lock().unwrap().insert(branch.to_string());
    }

    pub fn remove_branch(&self, branch: &str) {
        self.branches.lock().unwrap().remove(branch);
    }

    pub fn branches(&self) -> HashSet<String> {
        self.branches.lock().unwrap().clone()
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(&(branch.to_string(), path.to_string())).cloned()
    }

    pub fn prs(&self) -> Vec<OpenedPr> {
        self.prs.lock().unwrap().clone()
    }

    pub fn set_fail_pull_requests(&self, fail: bool) {
        *self.fail_pull_requests.lock().unwrap() = fail;
    }

    pub fn set_scan_delay(&self, delay: Duration) {
        *self.scan_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl RepositoryHost for FakeHost {
    async fn list_commits(&self, _repo: &RepoId, path: &str, since: DateTime<Utc>) -> Result<Vec<CommitRecord>, HostError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.scans.fetch_add(1, Ordering::SeqCst);

        let delay = *self.scan_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .commits
            .lock()
            .unwrap()
            .get(path)
            .map(|list| list.iter().filter(|c| c.author_date >= since).cloned().collect())
            .unwrap_or_default();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn get_ref(&self, _repo: &RepoId, branch: &str) -> Result<String, HostError> {
        if self.branches.lock().unwrap().contains(branch) {
            Ok(format!("{}-tip", branch))
        } else {
            Err(HostError::NotFound(format!("branch '{}'", branch)))
        }
    }

    async fn create_ref(&self, _repo: &RepoId, branch: &str, _sha: &str) -> Result<(), HostError> {
        if !self.branches.lock().unwrap().insert(branch.to_string()) {
            return Err(HostError::Api {
                status: 422,
                message: "Reference already exists".to_string(),
            });
        }
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        _repo: &RepoId,
        path: &str,
        content: &str,
        branch: &str,
        _message: &str,
    ) -> Result<(), HostError> {
        self.files
            .lock()
            .unwrap()
            .insert((branch.to_string(), path.to_string()), content.to_string());
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepoId,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError> {
        if *self.fail_pull_requests.lock().unwrap() {
            return Err(HostError::Api {
                status: 422,
                message: "Validation Failed".to_string(),
            });
        }
        let mut prs = self.prs.lock().unwrap();
        prs.push(OpenedPr {
            head: head.to_string(),
            base: base.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(PullRequest {
            number: prs.len() as u64,
            url: format!("https://github.com/{}/pull/{}", repo, prs.len()),
        })
    }
}

pub struct Env {
    pub temp: TempDir,
    pub host: Arc<FakeHost>,
    pub store: Arc<WatermarkStore>,
}

impl Env {
    pub fn new(scope: WatermarkScope) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(WatermarkStore::open(temp.path(), scope, day(1)).expect("Failed to open store"));
        Self {
            temp,
            host: FakeHost::new(),
            store,
        }
    }

    pub fn scheduler(&self, config: SchedulerConfig, pairs: Vec<RepoPair>) -> Scheduler {
        Scheduler::new(config, pairs, self.host.clone(), self.store.clone()).with_history(self.history())
    }

    pub fn history(&self) -> CycleLog {
        CycleLog::in_dir(self.temp.path())
    }
}
