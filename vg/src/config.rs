//! Vigilant configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{RepoId, RepoPair};

/// Name of the environment variable holding the host token by default
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Errors that make a configuration unusable
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid repository identifier '{value}': {reason}")]
    InvalidRepoId { value: String, reason: String },

    #[error("Host token not found. Set the {env} environment variable{}", token_file_hint(.file))]
    MissingToken { env: String, file: Option<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

fn token_file_hint(file: &Option<PathBuf>) -> String {
    match file {
        Some(path) => format!(" or create {}", path.display()),
        None => String::new(),
    }
}

/// Main vigilant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes between periodic cycles
    #[serde(rename = "poll-interval-minutes")]
    pub poll_interval_minutes: u64,

    /// Run one cycle immediately on startup instead of waiting a full interval
    #[serde(rename = "run-on-start")]
    pub run_on_start: bool,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Repository host settings
    pub github: GitHubConfig,

    /// Watermark persistence settings
    pub watermark: WatermarkConfig,

    /// Watched file / target repository pairs
    pub repos: Vec<RepoConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 10,
            run_on_start: false,
            log_level: None,
            github: GitHubConfig::default(),
            watermark: WatermarkConfig::default(),
            repos: Vec::new(),
        }
    }
}

impl Config {
    /// Candidate config locations, in priority order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".vigilant.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("vigilant").join("vigilant.yml"));
        }
        paths.push(PathBuf::from("/etc/vigilant/vigilant.yml"));
        paths
    }

    /// Load configuration with fallback chain
    ///
    /// An explicit path must exist. Otherwise the first existing file from
    /// [`Config::search_paths`] is used; a file that exists but fails to
    /// parse is reported rather than skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        debug!(?config_path, "Config::load: called");
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let searched = Self::search_paths();
        for candidate in &searched {
            if candidate.exists() {
                debug!(?candidate, "Config::load: found config file");
                return Self::load_from_file(candidate);
            }
        }

        Err(ConfigError::NotFound { searched })
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Any failure yields `None`; the full load reports errors later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Validate the configuration and produce the repository pairs
    ///
    /// Fails on a zero poll interval, an empty repo list, any empty field,
    /// or a repository identifier that is not `owner/name`.
    pub fn pairs(&self) -> Result<Vec<RepoPair>, ConfigError> {
        debug!(repo_count = self.repos.len(), "Config::pairs: called");
        if self.poll_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "poll-interval-minutes must be greater than zero".to_string(),
            ));
        }
        if self.repos.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one repos entry is required".to_string(),
            ));
        }

        self.repos
            .iter()
            .enumerate()
            .map(|(idx, repo)| repo.to_pair(idx))
            .collect()
    }

    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes * 60)
    }
}

/// One `repos:` entry as written in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    #[serde(rename = "source-repo")]
    pub source_repo: String,

    #[serde(rename = "file-path")]
    pub file_path: String,

    #[serde(rename = "target-repo")]
    pub target_repo: String,

    #[serde(rename = "base-branch")]
    pub base_branch: String,
}

impl RepoConfig {
    fn to_pair(&self, idx: usize) -> Result<RepoPair, ConfigError> {
        let require = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(ConfigError::Invalid(format!("repos[{}]: {} must not be empty", idx, field)))
            } else {
                Ok(())
            }
        };
        require("source-repo", &self.source_repo)?;
        require("file-path", &self.file_path)?;
        require("target-repo", &self.target_repo)?;
        require("base-branch", &self.base_branch)?;

        Ok(RepoPair::new(
            RepoId::parse(&self.source_repo)?,
            self.file_path.trim_start_matches('/'),
            RepoId::parse(&self.target_repo)?,
            &self.base_branch,
        ))
    }
}

/// Repository host (GitHub REST API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// API base URL (change for GitHub Enterprise)
    #[serde(rename = "api-url")]
    pub api_url: String,

    /// Environment variable containing the bearer token
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// File containing the bearer token, used when the env var is unset
    #[serde(rename = "token-file", skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Page size for commit listings
    #[serde(rename = "per-page")]
    pub per_page: u32,

    /// Upper bound on pages followed for one commit listing
    #[serde(rename = "max-pages")]
    pub max_pages: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            token_file: None,
            timeout_ms: 30_000,
            per_page: 100,
            max_pages: 10,
        }
    }
}

impl GitHubConfig {
    /// Resolve the bearer token from the environment, then the token file
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        debug!(token_env = %self.token_env, ?self.token_file, "resolve_token: called");
        if let Ok(token) = std::env::var(&self.token_env)
            && !token.trim().is_empty()
        {
            debug!("resolve_token: token found in environment");
            return Ok(token.trim().to_string());
        }

        let token_file = self.token_file.as_deref().map(expand_home);
        if let Some(path) = &token_file {
            match fs::read_to_string(path) {
                Ok(token) if !token.trim().is_empty() => {
                    debug!(?path, "resolve_token: token read from file");
                    return Ok(token.trim().to_string());
                }
                Ok(_) => warn!(?path, "Token file is empty"),
                Err(e) => warn!(?path, error = %e, "Failed to read token file"),
            }
        }

        Err(ConfigError::MissingToken {
            env: self.token_env.clone(),
            file: token_file,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Whether each pair owns its watermark or all pairs share one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkScope {
    #[default]
    PerPair,
    Global,
}

/// Watermark persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub scope: WatermarkScope,

    /// Watermark used for pairs with no stored record (defaults to startup time)
    #[serde(rename = "initial-since", skip_serializing_if = "Option::is_none")]
    pub initial_since: Option<DateTime<Utc>>,

    /// Directory holding watermark files and the cycle log
    #[serde(rename = "state-dir", skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl WatermarkConfig {
    /// Resolved state directory (`~/.cache/vigilant` on Linux by default)
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => expand_home(dir),
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("vigilant"),
        }
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
