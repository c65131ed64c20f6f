//! Poll scheduler.
//!
//! One long-lived task that, every `interval`:
//! 1. obtains an API token (on failure: sleep and try again, without
//!    advancing the liveness marker),
//! 2. loads the roster of pollable broadcasters,
//! 3. fetches live status in batches and reconciles every broadcaster of
//!    each batch, one at a time,
//! 4. stamps the liveness marker.
//!
//! Nothing that goes wrong inside an iteration stops the loop.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch_detector::{BatchOutcome, LiveStatusFetcher};
use super::reconciler::{ReconcileOutcome, SessionReconciler};
use crate::Error;
use crate::config::{MAX_FETCH_BATCH_SIZE, PollConfig};
use crate::credentials::{CredentialError, CredentialProvider};
use crate::database::models::RosterEntry;
use crate::database::repositories::BroadcasterRepository;
use crate::metrics::LivenessMarker;

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// No token obtained yet.
    Booting,
    /// Last iteration ran against the platform.
    Running,
    /// A token was obtained before but the last attempt failed.
    ErrorBackoff,
}

impl SchedulerPhase {
    pub fn next(self, outcome: &IterationOutcome) -> Self {
        match (self, outcome) {
            (Self::Booting, IterationOutcome::CredentialsUnavailable(_)) => Self::Booting,
            (_, IterationOutcome::CredentialsUnavailable(_)) => Self::ErrorBackoff,
            _ => Self::Running,
        }
    }
}

/// Counters for one poll iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationStats {
    pub roster: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Broadcasters left alone because their batch failed.
    pub skipped: usize,
    pub started: usize,
    pub updated: usize,
    pub ended: usize,
    pub unchanged: usize,
    /// Reconciliations that returned an error.
    pub failed: usize,
}

impl IterationStats {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Started { .. } => self.started += 1,
            ReconcileOutcome::Updated { .. } => self.updated += 1,
            ReconcileOutcome::Ended { .. } => self.ended += 1,
            ReconcileOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// How an iteration ended.
#[derive(Debug)]
pub enum IterationOutcome {
    /// Roster processed; individual failures are counted in the stats.
    Completed(IterationStats),
    /// The iteration body failed before finishing the roster.
    Failed(Error),
    /// No token could be obtained; nothing was fetched.
    CredentialsUnavailable(CredentialError),
}

impl IterationOutcome {
    /// Whether the liveness marker moves forward after this iteration.
    pub fn advances_liveness(&self) -> bool {
        !matches!(self, Self::CredentialsUnavailable(_))
    }
}

/// Split the roster into fetch batches of at most `size` entries.
fn partition(roster: &[RosterEntry], size: usize) -> std::slice::Chunks<'_, RosterEntry> {
    roster.chunks(size.clamp(1, MAX_FETCH_BATCH_SIZE))
}

/// The polling worker.
pub struct PollScheduler {
    config: PollConfig,
    credentials: Arc<dyn CredentialProvider>,
    fetcher: Arc<dyn LiveStatusFetcher>,
    roster: Arc<dyn BroadcasterRepository>,
    reconciler: Arc<dyn SessionReconciler>,
    liveness: Arc<LivenessMarker>,
}

impl PollScheduler {
    pub fn new(
        config: PollConfig,
        credentials: Arc<dyn CredentialProvider>,
        fetcher: Arc<dyn LiveStatusFetcher>,
        roster: Arc<dyn BroadcasterRepository>,
        reconciler: Arc<dyn SessionReconciler>,
        liveness: Arc<LivenessMarker>,
    ) -> Self {
        Self {
            config,
            credentials,
            fetcher,
            roster,
            reconciler,
            liveness,
        }
    }

    pub fn liveness(&self) -> &Arc<LivenessMarker> {
        &self.liveness
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Poll until `cancel` fires. An iteration in progress always finishes;
    /// cancellation only cuts the sleep between iterations short.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Poll scheduler started"
        );

        let mut phase = SchedulerPhase::Booting;

        loop {
            let outcome = self.run_iteration().await;
            self.log_outcome(&outcome);

            if outcome.advances_liveness() {
                self.liveness.mark_now();
            }

            let next = phase.next(&outcome);
            if next != phase {
                info!("Scheduler phase {:?} -> {:?}", phase, next);
                phase = next;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("Poll scheduler stopped");
    }

    /// Run one iteration. Never panics and never returns early with `?`:
    /// every failure is folded into the outcome.
    pub async fn run_iteration(&self) -> IterationOutcome {
        let token = match self.credentials.acquire().await {
            Ok(token) => token,
            Err(e) => return IterationOutcome::CredentialsUnavailable(e),
        };

        let roster = match self.roster.list_pollable().await {
            Ok(roster) => roster,
            Err(e) => return IterationOutcome::Failed(e),
        };

        let mut stats = IterationStats {
            roster: roster.len(),
            ..Default::default()
        };

        for batch in partition(&roster, self.config.batch_size) {
            stats.batches += 1;
            let ids: Vec<String> = batch.iter().map(|e| e.external_id.clone()).collect();

            let outcome = self.fetcher.fetch_snapshot(&ids, &token).await;
            if let BatchOutcome::Failed(failure) = &outcome {
                stats.failed_batches += 1;
                if self.config.suppress_close_on_fetch_failure {
                    warn!(
                        batch_size = failure.batch_size,
                        error = %failure.error,
                        "Batch fetch failed, leaving its sessions untouched"
                    );
                    stats.skipped += batch.len();
                    continue;
                }
                warn!(
                    batch_size = failure.batch_size,
                    error = %failure.error,
                    "Batch fetch failed, treating the batch as offline"
                );
            }

            let snapshot = outcome.into_snapshot();
            for entry in batch {
                let viewers = snapshot.get(&entry.external_id).copied().unwrap_or(0);
                match self.reconciler.reconcile(entry.id, viewers).await {
                    Ok(outcome) => stats.record(&outcome),
                    Err(e) => {
                        stats.failed += 1;
                        error!(
                            broadcaster_id = entry.id,
                            error_kind = e.kind(),
                            error = ?e,
                            "Failed to reconcile session"
                        );
                    }
                }
            }
        }

        IterationOutcome::Completed(stats)
    }

    fn log_outcome(&self, outcome: &IterationOutcome) {
        match outcome {
            IterationOutcome::Completed(stats) if stats.roster == 0 => {
                debug!("No broadcasters to poll");
            }
            IterationOutcome::Completed(stats) => {
                info!(
                    roster = stats.roster,
                    batches = stats.batches,
                    failed_batches = stats.failed_batches,
                    skipped = stats.skipped,
                    started = stats.started,
                    updated = stats.updated,
                    ended = stats.ended,
                    unchanged = stats.unchanged,
                    failed = stats.failed,
                    "Poll iteration completed"
                );
            }
            IterationOutcome::Failed(e) => {
                error!(error_kind = e.kind(), error = ?e, "Poll iteration failed");
            }
            IterationOutcome::CredentialsUnavailable(e) => {
                warn!(
                    error = %e,
                    "No API token available, retrying in {:?}",
                    self.config.interval
                );
            }
        }
    }
}
