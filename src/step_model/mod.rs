//! Step and distance estimation.
//!
//! Two independent strategies are available and the operator picks one per round:
//! - [`TimerEstimator`] turns elapsed walking time into distance using the configured
//!   walking speed, then into a step count using a height-derived stride length.
//! - [`MotionEstimator`] counts one step per accelerometer jolt above a threshold.
//!
//! Nothing here performs IO or fails; out-of-range inputs clamp to zero.

pub mod motion;
pub mod timer;

pub use motion::MotionEstimator;
pub use timer::{EstimatorStatus, TimerEstimator};

use serde::{Deserialize, Serialize};

/// Average stride length as a fraction of body height.
pub const STRIDE_TO_HEIGHT_RATIO: f64 = 0.415;

pub fn stride_length_m(height_cm: u32) -> f64 {
    STRIDE_TO_HEIGHT_RATIO * (height_cm as f64 / 100.0)
}

pub fn speed_m_per_s(speed_kmh: f64) -> f64 {
    speed_kmh * 1000.0 / 3600.0
}

/// Distance and whole steps covered since an estimator was (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEstimate {
    pub distance_m: f64,
    pub step_count: u32,
}

/// Stride length and walking speed resolved from the operator's settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrideProfile {
    stride_m: f64,
    speed_m_s: f64,
}

impl StrideProfile {
    pub fn new(height_cm: u32, speed_kmh: f64) -> Self {
        Self {
            stride_m: stride_length_m(height_cm),
            speed_m_s: speed_m_per_s(speed_kmh),
        }
    }

    pub fn stride_m(&self) -> f64 {
        self.stride_m
    }

    pub fn speed_m_s(&self) -> f64 {
        self.speed_m_s
    }

    /// `distance = speed * t`, `steps = floor(distance / stride)`.
    pub fn estimate(&self, elapsed_secs: f64) -> StepEstimate {
        let elapsed = if elapsed_secs.is_finite() && elapsed_secs > 0.0 {
            elapsed_secs
        } else {
            0.0
        };

        // f64::max drops NaN, so a NaN speed collapses to zero distance.
        let distance_m = (self.speed_m_s * elapsed).max(0.0);
        let step_count = if self.stride_m > 0.0 {
            // Float-to-int casts saturate, so absurd durations cannot overflow.
            (distance_m / self.stride_m).floor() as u32
        } else {
            0
        };

        StepEstimate {
            distance_m,
            step_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn stride_follows_height_ratio() {
        assert!((stride_length_m(175) - 0.72625).abs() < EPSILON);
        assert!((stride_length_m(200) - 0.83).abs() < EPSILON);
    }

    #[test]
    fn ten_seconds_at_five_kmh_for_175cm() {
        let profile = StrideProfile::new(175, 5.0);
        assert!((profile.speed_m_s() - 1.388_888_888_9).abs() < 1e-6);

        let estimate = profile.estimate(10.0);
        assert!((estimate.distance_m - 13.888_888_889).abs() < 1e-6);
        assert_eq!(estimate.step_count, 19);
    }

    #[test]
    fn estimate_is_monotonic_in_elapsed_time() {
        for height in [120, 150, 175, 220] {
            for speed in [1.4, 3.0, 5.0, 7.5] {
                let profile = StrideProfile::new(height, speed);
                let mut previous = profile.estimate(0.0);
                for tenth in 1..600 {
                    let current = profile.estimate(tenth as f64 / 10.0);
                    assert!(current.distance_m >= previous.distance_m);
                    assert!(current.step_count >= previous.step_count);
                    assert_eq!(
                        current.step_count,
                        (current.distance_m / profile.stride_m()).floor() as u32
                    );
                    previous = current;
                }
            }
        }
    }

    #[test]
    fn invalid_inputs_clamp_to_zero() {
        let profile = StrideProfile::new(175, 5.0);
        assert_eq!(profile.estimate(-3.0), StepEstimate::default());
        assert_eq!(profile.estimate(f64::NAN), StepEstimate::default());

        let no_stride = StrideProfile::new(0, 5.0);
        let estimate = no_stride.estimate(10.0);
        assert_eq!(estimate.step_count, 0);
        assert!(estimate.distance_m > 0.0);
    }
}
