//! SchedulerHandle - control interface for a running scheduler

use std::sync::Arc;

use eyre::{Result, eyre};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Cloneable handle to request cycles and shut the scheduler down
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    pub(crate) fn new(trigger_tx: mpsc::Sender<()>, shutdown_tx: watch::Sender<bool>) -> Self {
        debug!("SchedulerHandle::new: called");
        Self {
            trigger_tx,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Request an immediate cycle
    ///
    /// Returns `Ok(true)` when a new cycle was queued and `Ok(false)` when the
    /// request was folded into one already pending, or the scheduler is
    /// shutting down.
    pub fn trigger(&self) -> Result<bool> {
        debug!("SchedulerHandle::trigger: called");
        if self.is_shutdown() {
            debug!("SchedulerHandle::trigger: shutting down, ignored");
            return Ok(false);
        }
        match self.trigger_tx.try_send(()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(())) => {
                debug!("SchedulerHandle::trigger: cycle already pending, coalesced");
                Ok(false)
            }
            Err(TrySendError::Closed(())) => Err(eyre!("Scheduler is not running")),
        }
    }

    /// Stop the timer; an in-flight cycle runs to completion
    pub fn shutdown(&self) {
        debug!("SchedulerHandle::shutdown: called");
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
