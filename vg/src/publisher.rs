//! Publisher - turns a set of new commits into a notification pull request
//!
//! The workflow runs strictly in order and stops at the first failure:
//!
//! 1. resolve the base branch tip
//! 2. create a fresh branch at that tip
//! 3. compose the Markdown summary
//! 4. write the summary file on the new branch
//! 5. open the pull request
//!
//! Nothing is rolled back on failure. A branch without a pull request is a
//! visible leftover; the next cycle retries under a new branch name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{CommitRecord, RepoId, slug};
use crate::host::{HostError, PullRequest, RepositoryHost};

/// One step of the publish workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStep {
    ResolveBase,
    CreateBranch,
    Compose,
    WriteFile,
    OpenPullRequest,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveBase => "resolve-base",
            Self::CreateBranch => "create-branch",
            Self::Compose => "compose",
            Self::WriteFile => "write-file",
            Self::OpenPullRequest => "open-pull-request",
        };
        write!(f, "{}", name)
    }
}

/// A publish step failed; later steps were not attempted
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Nothing to publish: commit list is empty")]
    NoCommits,

    #[error("Step {step} failed for {target} ({detail}): {source}")]
    Step {
        step: PublishStep,
        target: RepoId,
        detail: String,
        #[source]
        source: HostError,
    },
}

impl PublishError {
    pub fn step(&self) -> PublishStep {
        match self {
            Self::NoCommits => PublishStep::Compose,
            Self::Step { step, .. } => *step,
        }
    }
}

/// Remote artifacts created by a successful publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPr {
    pub branch: String,
    pub file: String,
    pub pull_request: PullRequest,
}

pub type PublishResult = Result<PublishedPr, PublishError>;

pub struct Publisher {
    host: Arc<dyn RepositoryHost>,
    /// Last branch timestamp handed out per (target, path slug); distinct
    /// paths such as `a/b.md` and `a-b.md` share a slug and so a branch prefix
    last_stamps: Mutex<HashMap<(String, String), String>>,
}

impl Publisher {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self {
            host,
            last_stamps: Mutex::new(HashMap::new()),
        }
    }

    /// Publish `commits` (oldest first) as a pull request into `base_branch`
    pub async fn publish(
        &self,
        target: &RepoId,
        file_path: &str,
        base_branch: &str,
        commits: &[CommitRecord],
    ) -> PublishResult {
        debug!(%target, %file_path, %base_branch, commits = commits.len(), "Publisher::publish: called");
        if commits.is_empty() {
            return Err(PublishError::NoCommits);
        }

        let step_err = |step: PublishStep, detail: String| {
            let target = target.clone();
            move |source: HostError| PublishError::Step {
                step,
                target,
                detail,
                source,
            }
        };

        let base_sha = self
            .host
            .get_ref(target, base_branch)
            .await
            .map_err(step_err(PublishStep::ResolveBase, format!("base branch '{}'", base_branch)))?;
        debug!(%target, %base_branch, %base_sha, "Publisher::publish: resolved base");

        let branch = branch_name(file_path, &self.next_stamp(target, file_path).await);
        self.host
            .create_ref(target, &branch, &base_sha)
            .await
            .map_err(step_err(PublishStep::CreateBranch, format!("branch '{}'", branch)))?;
        info!(%target, %branch, "Created branch");

        let body = compose_body(file_path, commits);

        let file = notification_file(file_path);
        self.host
            .create_or_update_file(target, &file, &body, &branch, &commit_message(file_path))
            .await
            .map_err(step_err(PublishStep::WriteFile, format!("file '{}' on '{}'", file, branch)))?;
        debug!(%target, %file, %branch, "Publisher::publish: wrote notification file");

        let pull_request = self
            .host
            .create_pull_request(target, &branch, base_branch, &pr_title(file_path), &body)
            .await
            .map_err(|source| {
                warn!(%target, %branch, "Branch and file created but pull request failed; leaving branch in place");
                step_err(PublishStep::OpenPullRequest, format!("'{}' into '{}'", branch, base_branch))(source)
            })?;
        info!(%target, number = pull_request.number, url = %pull_request.url, "Opened pull request");

        Ok(PublishedPr {
            branch,
            file,
            pull_request,
        })
    }

    /// Timestamp for a new branch, unique per target and branch prefix
    /// within this process
    ///
    /// Two publishes with the same slug to one target in one wall-clock
    /// second would produce the same branch name, so the second one waits for
    /// the next second.
    async fn next_stamp(&self, target: &RepoId, file_path: &str) -> String {
        let key = (target.to_string(), slug(file_path));
        let mut last = self.last_stamps.lock().await;
        loop {
            let now = Utc::now();
            let stamp = branch_stamp(now);
            if last.get(&key) != Some(&stamp) {
                last.insert(key, stamp.clone());
                return stamp;
            }
            let remaining = 1_000_000_000u64.saturating_sub(u64::from(now.timestamp_subsec_nanos()));
            debug!(%file_path, remaining_ns = remaining, "next_stamp: same second as last branch, waiting");
            tokio::time::sleep(Duration::from_nanos(remaining.max(1_000_000))).await;
        }
    }
}

/// `YYYYmmdd-HHMMSS` in UTC
pub fn branch_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

pub fn branch_name(file_path: &str, stamp: &str) -> String {
    format!("{}-update-{}", slug(file_path), stamp)
}

pub fn notification_file(file_path: &str) -> String {
    format!("{}-updates.md", slug(file_path))
}

pub fn pr_title(file_path: &str) -> String {
    format!("Update: Changes in {}", file_path)
}

fn commit_message(file_path: &str) -> String {
    format!("Notify about changes to {}", file_path)
}

/// Author date in RFC 1123 form, e.g. `Tue, 02 Jan 2024 00:00:00 UTC`
pub fn format_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S UTC").to_string()
}

/// Markdown summary used for both the notification file and the PR body
pub fn compose_body(file_path: &str, commits: &[CommitRecord]) -> String {
    let mut body = format!(
        "This pull request notifies that there have been changes to `{}` in the source repository.\n\n",
        file_path
    );
    for commit in commits {
        body.push_str(&format!(
            "- [{}]({}) - {}\n",
            escape_link_text(commit.summary()),
            commit.permalink,
            format_date(commit.author_date)
        ));
    }
    body
}

fn escape_link_text(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}
