//! Worker liveness tracking.
//!
//! The poll loop stamps a [`LivenessMarker`] at the end of every completed
//! iteration; the health endpoint asks a [`LivenessReporter`] whether that
//! stamp is recent enough.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::config::HealthConfig;
use crate::database::time::now_ms;

/// Timestamp (epoch ms) of the last completed poll iteration.
///
/// Zero means no iteration has completed yet.
#[derive(Debug, Default)]
pub struct LivenessMarker {
    last_completed_ms: AtomicI64,
}

impl LivenessMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed iteration at `now_ms`. The marker never moves back.
    pub fn mark(&self, now_ms: i64) {
        self.last_completed_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    pub fn mark_now(&self) {
        self.mark(now_ms());
    }

    pub fn last_completed_ms(&self) -> Option<i64> {
        match self.last_completed_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }
}

/// Result of a liveness evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LivenessStatus {
    /// No iteration completed yet, still within the start-up grace window.
    Booting,
    /// Last iteration is recent.
    Healthy { seconds_since_last_loop: u64 },
    /// Last iteration is too old, or none completed after the grace window.
    Unhealthy {
        seconds_since_last_loop: Option<u64>,
        seconds_since_start: u64,
    },
}

impl LivenessStatus {
    pub fn is_healthy(&self) -> bool {
        !matches!(self, Self::Unhealthy { .. })
    }

    /// Operator-facing explanation for an unhealthy status.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Unhealthy {
                seconds_since_last_loop: Some(secs),
                ..
            } => Some(format!(
                "Worker thread is unhealthy. Last loop was {} seconds ago.",
                secs
            )),
            Self::Unhealthy {
                seconds_since_last_loop: None,
                seconds_since_start,
            } => Some(format!(
                "Worker thread is unhealthy. No loop completed since start {} seconds ago.",
                seconds_since_start
            )),
            _ => None,
        }
    }
}

/// Evaluates the liveness marker against the configured thresholds.
#[derive(Debug, Clone)]
pub struct LivenessReporter {
    marker: Arc<LivenessMarker>,
    started_at_ms: i64,
    config: HealthConfig,
}

impl LivenessReporter {
    pub fn new(marker: Arc<LivenessMarker>, config: HealthConfig) -> Self {
        Self::with_start_time(marker, config, now_ms())
    }

    pub fn with_start_time(
        marker: Arc<LivenessMarker>,
        config: HealthConfig,
        started_at_ms: i64,
    ) -> Self {
        Self {
            marker,
            started_at_ms,
            config,
        }
    }

    pub fn evaluate(&self) -> LivenessStatus {
        self.evaluate_at(now_ms())
    }

    pub fn evaluate_at(&self, now_ms: i64) -> LivenessStatus {
        let since_start = elapsed(self.started_at_ms, now_ms);

        match self.marker.last_completed_ms() {
            None if since_start < self.config.grace_period => LivenessStatus::Booting,
            None => LivenessStatus::Unhealthy {
                seconds_since_last_loop: None,
                seconds_since_start: since_start.as_secs(),
            },
            Some(last) => {
                let since_last = elapsed(last, now_ms);
                if since_last > self.config.stale_after {
                    LivenessStatus::Unhealthy {
                        seconds_since_last_loop: Some(rounded_secs(since_last)),
                        seconds_since_start: since_start.as_secs(),
                    }
                } else {
                    LivenessStatus::Healthy {
                        seconds_since_last_loop: rounded_secs(since_last),
                    }
                }
            }
        }
    }
}

fn elapsed(from_ms: i64, to_ms: i64) -> Duration {
    Duration::from_millis(to_ms.saturating_sub(from_ms).max(0) as u64)
}

fn rounded_secs(d: Duration) -> u64 {
    (d.as_millis() as u64 + 500) / 1000
}
