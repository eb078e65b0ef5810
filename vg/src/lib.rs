//! vigilant - upstream file watcher
//!
//! vigilant polls source repositories for commits touching configured files
//! and, for each batch of new commits, opens a pull request in a target
//! repository that lists them. A durable per-pair watermark records how far
//! each file has been reported.
//!
//! # Modules
//!
//! - [`config`] - Configuration types, discovery and validation
//! - [`domain`] - Repository identifiers, pairs and commit records
//! - [`host`] - Repository host trait and GitHub implementation
//! - [`watermark`] - Durable "last checked" instants
//! - [`scanner`] - Finds commits newer than a watermark
//! - [`publisher`] - Branch, file and pull request creation
//! - [`scheduler`] - Timer and trigger driven cycles
//! - [`history`] - JSONL log of cycle reports
//! - [`daemon`] - PID file based process control
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod history;
pub mod host;
pub mod publisher;
pub mod scanner;
pub mod scheduler;
pub mod watermark;

pub use config::{Config, ConfigError};
pub use domain::{CommitRecord, RepoId, RepoPair};
pub use host::{GitHubHost, HostError, PullRequest, RepositoryHost};
pub use publisher::{PublishError, PublishStep, PublishedPr, Publisher};
pub use scanner::{CommitScanner, ScanError};
pub use scheduler::{CycleReport, PairOutcome, Scheduler, SchedulerConfig, SchedulerHandle, Trigger};
pub use watermark::{PersistenceError, WatermarkStore};
