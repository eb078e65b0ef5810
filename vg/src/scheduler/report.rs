//! Cycle and per-pair outcome records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::publisher::PublishStep;

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Tick,
    Manual,
    Once,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tick => "tick",
            Self::Manual => "manual",
            Self::Once => "once",
        };
        write!(f, "{}", name)
    }
}

/// Result of processing one pair in one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum PairOutcome {
    NoChanges,
    Published {
        commits: usize,
        branch: String,
        pr_url: String,
        watermark: DateTime<Utc>,
    },
    ScanFailed {
        reason: String,
    },
    PublishFailed {
        step: PublishStep,
        reason: String,
    },
    /// The pull request exists but the watermark could not be recorded
    PersistFailed {
        pr_url: String,
        reason: String,
    },
}

impl PairOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ScanFailed { .. } | Self::PublishFailed { .. } | Self::PersistFailed { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoChanges => "no-changes",
            Self::Published { .. } => "published",
            Self::ScanFailed { .. } => "scan-failed",
            Self::PublishFailed { .. } => "publish-failed",
            Self::PersistFailed { .. } => "persist-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairReport {
    /// Human-readable pair, e.g. `up/lib:docs/api.md -> down/fork (main)`
    pub pair: String,
    /// Watermark key used for this pair
    pub key: String,
    /// Watermark the scan started from
    pub since: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: PairOutcome,
}

/// Summary of one scheduler cycle, one JSON line in the cycle log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<PairReport>,
}

impl CycleReport {
    pub fn published(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, PairOutcome::Published { .. }))
            .count()
    }

    pub fn unchanged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| r.outcome == PairOutcome::NoChanges)
            .count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }
}
