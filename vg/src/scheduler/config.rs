//! Scheduler configuration

use std::time::Duration;

use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between periodic cycles
    pub poll_interval: Duration,

    /// Run a cycle immediately instead of waiting one full interval
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10 * 60),
            run_on_start: false,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        debug!(
            poll_interval_minutes = config.poll_interval_minutes,
            run_on_start = config.run_on_start,
            "SchedulerConfig::from_config: called"
        );
        Self {
            poll_interval: config.poll_interval(),
            run_on_start: config.run_on_start,
        }
    }
}
