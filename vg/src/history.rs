//! Cycle log - persists cycle reports to a JSONL file
//!
//! Every finished cycle is appended as one JSON line to
//! `<state-dir>/cycles.jsonl`, which `vg history` reads back.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::scheduler::CycleReport;

pub const CYCLE_LOG_FILE: &str = "cycles.jsonl";

#[derive(Debug, Clone)]
pub struct CycleLog {
    path: PathBuf,
}

impl CycleLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "CycleLog::new: called");
        Self { path }
    }

    /// Cycle log stored alongside the watermarks
    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join(CYCLE_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one report as a JSON line
    pub fn append(&self, report: &CycleReport) -> eyre::Result<()> {
        debug!(cycle_id = %report.cycle_id, path = ?self.path, "CycleLog::append: called");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(report)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        Ok(())
    }

    /// The last `limit` reports, oldest first
    ///
    /// A missing log is empty. Lines that fail to parse are skipped.
    pub fn read_recent(&self, limit: usize) -> eyre::Result<Vec<CycleReport>> {
        debug!(path = ?self.path, limit, "CycleLog::read_recent: called");
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let mut reports = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CycleReport>(line) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "CycleLog::read_recent: skipping unparsable line"),
            }
        }

        let skip = reports.len().saturating_sub(limit);
        debug!(total = reports.len(), skip, "CycleLog::read_recent: loaded");
        Ok(reports.into_iter().skip(skip).collect())
    }
}
