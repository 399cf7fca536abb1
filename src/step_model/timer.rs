use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::{StepEstimate, StrideProfile};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EstimatorStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Elapsed-time based estimator.
///
/// The estimator holds no timer of its own: every reading is computed from the
/// instant the caller passes in, so a render loop can poll it as often as it likes.
#[derive(Debug, Clone)]
pub struct TimerEstimator {
    profile: StrideProfile,
    status: EstimatorStatus,
    /// Walking time accumulated from earlier running windows; combines with
    /// `running_anchor` to give the true elapsed time.
    baseline_ms: u64,
    running_anchor: Option<Instant>,
    frozen: Option<StepEstimate>,
}

impl TimerEstimator {
    pub fn new(profile: StrideProfile) -> Self {
        Self {
            profile,
            status: EstimatorStatus::Idle,
            baseline_ms: 0,
            running_anchor: None,
            frozen: None,
        }
    }

    pub fn status(&self) -> EstimatorStatus {
        self.status
    }

    pub fn profile(&self) -> StrideProfile {
        self.profile
    }

    pub fn start(&mut self, now: Instant) {
        self.status = EstimatorStatus::Running;
        self.baseline_ms = 0;
        self.running_anchor = Some(now);
        self.frozen = None;
    }

    pub fn pause(&mut self, now: Instant) {
        if self.status != EstimatorStatus::Running {
            return;
        }
        self.baseline_ms = self.elapsed_ms(now);
        self.running_anchor = None;
        self.status = EstimatorStatus::Paused;
    }

    pub fn resume(&mut self, now: Instant) {
        if self.status != EstimatorStatus::Paused {
            return;
        }
        self.running_anchor = Some(now);
        self.status = EstimatorStatus::Running;
    }

    /// Rebases elapsed time to zero. The stride profile and run state are kept.
    pub fn reset(&mut self, now: Instant) {
        self.baseline_ms = 0;
        self.frozen = None;
        if self.status == EstimatorStatus::Running {
            self.running_anchor = Some(now);
        }
    }

    /// Freezes the last computed values; later reads return them unchanged.
    pub fn stop(&mut self, now: Instant) -> StepEstimate {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        let estimate = self.estimate(now);
        self.baseline_ms = self.elapsed_ms(now);
        self.running_anchor = None;
        self.status = EstimatorStatus::Stopped;
        self.frozen = Some(estimate);
        estimate
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        match (self.status, self.running_anchor) {
            (EstimatorStatus::Running, Some(anchor)) => self
                .baseline_ms
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64),
            _ => self.baseline_ms,
        }
    }

    pub fn elapsed_secs(&self, now: Instant) -> f64 {
        self.elapsed_ms(now) as f64 / 1000.0
    }

    pub fn estimate(&self, now: Instant) -> StepEstimate {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        self.profile.estimate(self.elapsed_secs(now))
    }
}
