//! GitHub REST API host implementation
//!
//! Implements [`RepositoryHost`] against the v3 REST API. Works with
//! github.com and GitHub Enterprise (set `github.api-url`).

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, LINK, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{HostError, PullRequest, RepositoryHost};
use crate::config::GitHubConfig;
use crate::domain::{CommitRecord, RepoId};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// GitHub API client
pub struct GitHubHost {
    api_url: String,
    token: String,
    http: Client,
    per_page: u32,
    max_pages: u32,
}

impl GitHubHost {
    /// Create a client for `api_url` authenticating with `token`
    pub fn new(api_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, HostError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        debug!(%api_url, ?timeout, "GitHubHost::new: called");
        let http = Client::builder().timeout(timeout).build().map_err(HostError::Network)?;

        Ok(Self {
            api_url,
            token: token.into(),
            http,
            per_page: 100,
            max_pages: 10,
        })
    }

    /// Create a client from configuration and a resolved token
    pub fn from_config(config: &GitHubConfig, token: impl Into<String>) -> Result<Self, HostError> {
        debug!(?config.api_url, "GitHubHost::from_config: called");
        let mut host = Self::new(&config.api_url, token, config.timeout())?;
        host.per_page = config.per_page.clamp(1, 100);
        host.max_pages = config.max_pages.max(1);
        Ok(host)
    }

    fn repo_url(&self, repo: &RepoId, suffix: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, repo.owner, repo.name, suffix)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, concat!("vigilant/", env!("CARGO_PKG_VERSION")))
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    /// Send a request, turning non-success statuses into errors
    async fn send(&self, builder: RequestBuilder) -> Result<Response, HostError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        debug!(status = status.as_u16(), %message, "GitHubHost::send: non-success status");
        Err(HostError::from_status(status.as_u16(), message))
    }

    /// SHA of an existing file on a branch, if any
    async fn file_sha(&self, repo: &RepoId, path: &str, branch: &str) -> Result<Option<String>, HostError> {
        let url = self.repo_url(repo, &format!("contents/{}", path));
        let builder = self.request(Method::GET, &url).query(&[("ref", branch)]);
        match self.send(builder).await {
            Ok(response) => {
                let existing: ContentResponse = response.json().await?;
                debug!(%path, %branch, sha = %existing.sha, "file_sha: file exists");
                Ok(Some(existing.sha))
            }
            Err(e) if e.is_not_found() => {
                debug!(%path, %branch, "file_sha: file does not exist");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RepositoryHost for GitHubHost {
    async fn list_commits(
        &self,
        repo: &RepoId,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CommitRecord>, HostError> {
        debug!(%repo, %path, %since, "list_commits: called");
        let since_param = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let per_page = self.per_page.to_string();

        let first = self.request(Method::GET, &self.repo_url(repo, "commits")).query(&[
            ("path", path),
            ("since", since_param.as_str()),
            ("per_page", per_page.as_str()),
        ]);

        let mut commits = Vec::new();
        let mut response = self.send(first).await?;
        let mut pages = 1;

        loop {
            let next = next_link(response.headers());
            let page: Vec<ApiCommit> = response.json().await?;
            debug!(page = pages, count = page.len(), "list_commits: received page");
            commits.extend(page.into_iter().filter_map(ApiCommit::into_record));

            let Some(next) = next else {
                break;
            };
            // Pages run newest first; stopping early would drop the oldest commits
            if pages >= self.max_pages {
                warn!(%repo, %path, pages, "Commit listing exceeds max-pages");
                return Err(HostError::InvalidResponse(format!(
                    "commit history for {} in {} spans more than {} pages of {}; raise github.max-pages",
                    path, repo, self.max_pages, self.per_page
                )));
            }
            response = self.send(self.request(Method::GET, &next)).await?;
            pages += 1;
        }

        debug!(%repo, %path, count = commits.len(), "list_commits: returning");
        Ok(commits)
    }

    async fn get_ref(&self, repo: &RepoId, branch: &str) -> Result<String, HostError> {
        debug!(%repo, %branch, "get_ref: called");
        let url = self.repo_url(repo, &format!("git/ref/heads/{}", branch));
        let response = self.send(self.request(Method::GET, &url)).await.map_err(|e| match e {
            HostError::NotFound(_) => HostError::NotFound(format!("branch '{}' in {}", branch, repo)),
            other => other,
        })?;
        let reference: RefResponse = response.json().await?;
        Ok(reference.object.sha)
    }

    async fn create_ref(&self, repo: &RepoId, branch: &str, sha: &str) -> Result<(), HostError> {
        debug!(%repo, %branch, %sha, "create_ref: called");
        let url = self.repo_url(repo, "git/refs");
        self.send(self.request(Method::POST, &url).json(&ref_body(branch, sha)))
            .await?;
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        repo: &RepoId,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), HostError> {
        debug!(%repo, %path, %branch, "create_or_update_file: called");
        let sha = self.file_sha(repo, path, branch).await?;
        let url = self.repo_url(repo, &format!("contents/{}", path));
        let body = file_body(content, branch, message, sha.as_deref());
        self.send(self.request(Method::PUT, &url).json(&body)).await?;
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
        debug!(%repo, %head, %base, "create_pull_request: called");
        let url = self.repo_url(repo, "pulls");
        let payload = json!({
            "title": title,
            "head": head,
            "base": base,
            "body": body,
        });
        let response = self.send(self.request(Method::POST, &url).json(&payload)).await?;
        let pr: PullResponse = response.json().await?;
        Ok(PullRequest {
            number: pr.number,
            url: pr.html_url,
        })
    }
}

fn ref_body(branch: &str, sha: &str) -> serde_json::Value {
    json!({
        "ref": format!("refs/heads/{}", branch),
        "sha": sha,
    })
}

fn file_body(content: &str, branch: &str, message: &str, sha: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "message": message,
        "content": BASE64.encode(content.as_bytes()),
        "branch": branch,
    });
    if let Some(sha) = sha {
        body["sha"] = json!(sha);
    }
    body
}

/// Extract the `rel="next"` URL from a `Link` header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    parse_next_link(link)
}

fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let mut sections = part.split(';');
        let url = sections.next()?.trim();
        let is_next = sections.any(|s| s.trim() == r#"rel="next""#);
        if is_next {
            Some(url.trim_start_matches('<').trim_end_matches('>').to_string())
        } else {
            None
        }
    })
}

/// Pull the `message` field out of a GitHub error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    html_url: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
    author: Option<ApiSignature>,
    committer: Option<ApiSignature>,
}

#[derive(Debug, Deserialize)]
struct ApiSignature {
    date: DateTime<Utc>,
}

impl ApiCommit {
    fn into_record(self) -> Option<CommitRecord> {
        let date = self
            .commit
            .author
            .as_ref()
            .or(self.commit.committer.as_ref())
            .map(|s| s.date);
        let Some(author_date) = date else {
            warn!(sha = %self.sha, "Commit has no author or committer date, skipping");
            return None;
        };
        Some(CommitRecord::new(self.sha, self.commit.message, author_date, self.html_url))
    }
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}
