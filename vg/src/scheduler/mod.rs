//! Scheduler
//!
//! Timer ticks and manual triggers both funnel into one run loop. A cycle
//! lock keeps cycles from overlapping, and triggers that arrive while a cycle
//! runs collapse into a single follow-up cycle.

mod config;
mod core;
mod handle;
mod report;

pub use config::SchedulerConfig;
pub use core::Scheduler;
pub use handle::SchedulerHandle;
pub use report::{CycleReport, PairOutcome, PairReport, Trigger};
