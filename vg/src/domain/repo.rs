//! Repository identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::config::ConfigError;

/// A repository on the host, addressed as `owner/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `owner/name` identifier
    ///
    /// Exactly one `/` is allowed and neither side may be empty or contain
    /// whitespace.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        debug!(%s, "RepoId::parse: called");
        let invalid = |reason: &str| ConfigError::InvalidRepoId {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split('/');
        let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            debug!(%s, "RepoId::parse: wrong number of segments");
            return Err(invalid("expected exactly one '/' (owner/name)"));
        };

        if owner.is_empty() || name.is_empty() {
            return Err(invalid("owner and name must both be non-empty"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(invalid("must not contain whitespace"));
        }

        Ok(Self::new(owner, name))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RepoId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
