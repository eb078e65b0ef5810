//! Commit metadata as seen by the scanner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only projection of a remote commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub message: String,
    pub author_date: DateTime<Utc>,
    pub permalink: String,
}

impl CommitRecord {
    pub fn new(
        sha: impl Into<String>,
        message: impl Into<String>,
        author_date: DateTime<Utc>,
        permalink: impl Into<String>,
    ) -> Self {
        Self {
            sha: sha.into(),
            message: message.into(),
            author_date,
            permalink: permalink.into(),
        }
    }

    /// First line of the commit message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }
}
