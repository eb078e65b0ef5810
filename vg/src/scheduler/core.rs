//! Scheduler - drives scan/publish cycles over every configured pair

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SchedulerConfig;
use super::handle::SchedulerHandle;
use super::report::{CycleReport, PairOutcome, PairReport, Trigger};
use crate::config::WatermarkScope;
use crate::domain::RepoPair;
use crate::history::CycleLog;
use crate::host::RepositoryHost;
use crate::publisher::Publisher;
use crate::scanner::CommitScanner;
use crate::watermark::{GLOBAL_KEY, WatermarkStore};

/// Runs cycles on a timer and on demand, one at a time
///
/// A cycle snapshots every pair's watermark, then walks the pairs in
/// configuration order: scan, publish when something is new, and advance
/// the watermark only after the pull request exists. A failure in one pair
/// is recorded and the cycle moves on to the next.
///
/// Under global scope every pair shares one watermark, so it is saved once
/// at the end of the cycle and only when no pair failed; otherwise a failed
/// pair's commits could fall behind a watermark advanced by another pair.
pub struct Scheduler {
    config: SchedulerConfig,
    pairs: Vec<RepoPair>,
    scanner: CommitScanner,
    publisher: Publisher,
    store: Arc<WatermarkStore>,
    history: Option<CycleLog>,
    cycle_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        pairs: Vec<RepoPair>,
        host: Arc<dyn RepositoryHost>,
        store: Arc<WatermarkStore>,
    ) -> Self {
        debug!(pairs = pairs.len(), ?config, "Scheduler::new: called");
        Self {
            config,
            pairs,
            scanner: CommitScanner::new(host.clone()),
            publisher: Publisher::new(host),
            store,
            history: None,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Append every finished cycle to `log`
    pub fn with_history(mut self, log: CycleLog) -> Self {
        self.history = Some(log);
        self
    }

    /// Run a single cycle outside the timer
    pub async fn run_once(&self) -> CycleReport {
        self.run_cycle(Trigger::Once).await
    }

    /// Run one full cycle over every pair
    ///
    /// Waits for any cycle already in progress; cycles never overlap.
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let cycle_id = Uuid::now_v7();
        let started_at = Utc::now();
        info!(%cycle_id, %trigger, pairs = self.pairs.len(), "Cycle started");

        let snapshot: Vec<(String, DateTime<Utc>)> = self
            .pairs
            .iter()
            .map(|pair| {
                let key = self.store.key_for(pair);
                let since = self.store.load(&key);
                (key, since)
            })
            .collect();

        let shared = self.store.scope() == WatermarkScope::Global;
        let mut outcomes = Vec::with_capacity(self.pairs.len());
        for (pair, (key, since)) in self.pairs.iter().zip(snapshot) {
            let outcome = self.process_pair(pair, &key, since, !shared).await;
            outcomes.push(PairReport {
                pair: pair.to_string(),
                key,
                since,
                outcome,
            });
        }
        if shared {
            self.advance_shared(&cycle_id, &mut outcomes);
        }

        let report = CycleReport {
            cycle_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            %cycle_id,
            published = report.published(),
            unchanged = report.unchanged(),
            failed = report.failures(),
            "Cycle finished"
        );

        if let Some(history) = &self.history
            && let Err(e) = history.append(&report)
        {
            warn!(%cycle_id, error = %e, "Failed to append cycle report");
        }

        report
    }

    /// Scan one pair and publish anything newer than `since`
    ///
    /// The new watermark is the latest author date among the published
    /// commits, not the time of the cycle, so a commit authored while the
    /// cycle runs is picked up by the next one. It is saved here when
    /// `persist` is set; otherwise the caller saves it after the cycle.
    async fn process_pair(&self, pair: &RepoPair, key: &str, since: DateTime<Utc>, persist: bool) -> PairOutcome {
        debug!(%pair, %since, persist, "Scheduler::process_pair: called");

        let commits = match self.scanner.scan(&pair.source_repo, &pair.file_path, since).await {
            Ok(commits) => commits,
            Err(e) => {
                warn!(%pair, error = %e, "Scan failed, skipping pair");
                return PairOutcome::ScanFailed { reason: e.to_string() };
            }
        };

        let Some(watermark) = commits.iter().map(|c| c.author_date).max() else {
            info!(%pair, %since, "No new commits");
            return PairOutcome::NoChanges;
        };
        info!(%pair, commits = commits.len(), "Found new commits");

        let published = match self
            .publisher
            .publish(&pair.target_repo, &pair.file_path, &pair.base_branch, &commits)
            .await
        {
            Ok(published) => published,
            Err(e) => {
                warn!(%pair, step = %e.step(), error = %e, "Publish failed, watermark unchanged");
                return PairOutcome::PublishFailed {
                    step: e.step(),
                    reason: e.to_string(),
                };
            }
        };

        let pr_url = published.pull_request.url.clone();
        if !persist {
            info!(%pair, pr = %pr_url, %watermark, "Published notification, watermark deferred to end of cycle");
            return PairOutcome::Published {
                commits: commits.len(),
                branch: published.branch,
                pr_url,
                watermark,
            };
        }
        match self.store.save(key, watermark) {
            Ok(advanced) => {
                info!(%pair, pr = %pr_url, %watermark, advanced, "Published notification");
                PairOutcome::Published {
                    commits: commits.len(),
                    branch: published.branch,
                    pr_url,
                    watermark,
                }
            }
            Err(e) => {
                error!(%pair, pr = %pr_url, error = %e, "Pull request opened but watermark not saved");
                PairOutcome::PersistFailed {
                    pr_url,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Save the shared watermark once every pair of the cycle has run
    ///
    /// Held back when any pair failed, so the failed pair is retried from
    /// the same snapshot next cycle. A failed save turns every published
    /// outcome into [`PairOutcome::PersistFailed`].
    fn advance_shared(&self, cycle_id: &Uuid, outcomes: &mut [PairReport]) {
        let Some(watermark) = outcomes
            .iter()
            .filter_map(|r| match &r.outcome {
                PairOutcome::Published { watermark, .. } => Some(*watermark),
                _ => None,
            })
            .max()
        else {
            return;
        };

        let failed = outcomes.iter().filter(|r| r.outcome.is_failure()).count();
        if failed > 0 {
            warn!(%cycle_id, failed, %watermark, "Pairs failed this cycle, shared watermark unchanged");
            return;
        }

        match self.store.save(GLOBAL_KEY, watermark) {
            Ok(advanced) => debug!(%cycle_id, %watermark, advanced, "Scheduler::advance_shared: saved"),
            Err(e) => {
                error!(%cycle_id, error = %e, "Pull requests opened but shared watermark not saved");
                let reason = e.to_string();
                for report in outcomes.iter_mut() {
                    if let PairOutcome::Published { pr_url, .. } = &report.outcome {
                        report.outcome = PairOutcome::PersistFailed {
                            pr_url: pr_url.clone(),
                            reason: reason.clone(),
                        };
                    }
                }
            }
        }
    }

    /// Start the timer loop on a background task
    pub fn spawn(self: Arc<Self>) -> (SchedulerHandle, JoinHandle<()>) {
        debug!("Scheduler::spawn: called");
        // Capacity 1: triggers arriving during a cycle collapse into one follow-up
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(trigger_rx, shutdown_rx).await });
        (SchedulerHandle::new(trigger_tx, shutdown_tx), task)
    }

    async fn run(self: Arc<Self>, mut trigger_rx: mpsc::Receiver<()>, mut shutdown_rx: watch::Receiver<bool>) {
        let period = self.config.poll_interval;
        let start = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?period, run_on_start = self.config.run_on_start, "Scheduler running");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        debug!("Scheduler::run: shutdown sender dropped");
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.run_cycle(Trigger::Tick).await;
                }
                Some(()) = trigger_rx.recv() => {
                    self.run_cycle(Trigger::Manual).await;
                }
            }
        }

        info!("Scheduler stopped");
    }
}
