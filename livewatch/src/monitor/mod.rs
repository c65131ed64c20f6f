//! Live-status monitoring.
//!
//! - [`BatchDetector`]: fetches who is live, up to 100 broadcasters per call
//! - [`SqlxSessionReconciler`]: turns each observation into session rows
//! - [`PollScheduler`]: the loop driving both

mod batch_detector;
mod reconciler;
mod service;

#[cfg(test)]
pub use batch_detector::MockLiveStatusFetcher;
pub use batch_detector::{BatchDetector, BatchFailure, BatchOutcome, LiveStatusFetcher, Snapshot};
#[cfg(test)]
pub use reconciler::MockSessionReconciler;
pub use reconciler::{ReconcileOutcome, SessionReconciler, SqlxSessionReconciler};
pub use service::{IterationOutcome, IterationStats, PollScheduler, SchedulerPhase};
