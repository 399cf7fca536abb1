use std::time::{Duration, Instant};

/// Minimum change in acceleration magnitude between two samples that counts as a step.
pub const DEFAULT_MOTION_THRESHOLD: f64 = 0.5;
/// Minimum spacing between two accepted steps.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Event-driven pedometer fed with accelerometer magnitudes.
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    threshold: f64,
    debounce: Duration,
    previous: Option<f64>,
    last_step_at: Option<Instant>,
    step_count: u32,
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_THRESHOLD, DEFAULT_DEBOUNCE)
    }
}

impl MotionEstimator {
    pub fn new(threshold: f64, debounce: Duration) -> Self {
        Self {
            threshold,
            debounce,
            previous: None,
            last_step_at: None,
            step_count: 0,
        }
    }

    pub fn magnitude(x: f64, y: f64, z: f64) -> f64 {
        (x * x + y * y + z * z).sqrt()
    }

    /// Feeds one sample. Returns `true` when the sample is accepted as a step.
    ///
    /// The very first sample only primes the baseline. Non-finite samples are ignored
    /// and do not replace the baseline.
    pub fn ingest(&mut self, magnitude: f64, at: Instant) -> bool {
        if !magnitude.is_finite() {
            return false;
        }

        let Some(previous) = self.previous.replace(magnitude) else {
            return false;
        };

        if (magnitude - previous).abs() <= self.threshold {
            return false;
        }

        if let Some(last) = self.last_step_at {
            if at.saturating_duration_since(last) < self.debounce {
                return false;
            }
        }

        self.last_step_at = Some(at);
        self.step_count = self.step_count.saturating_add(1);
        true
    }

    pub fn ingest_vector(&mut self, x: f64, y: f64, z: f64, at: Instant) -> bool {
        self.ingest(Self::magnitude(x, y, z), at)
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.last_step_at = None;
        self.step_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_only_primes_the_baseline() {
        let mut estimator = MotionEstimator::default();
        let t0 = Instant::now();
        assert!(!estimator.ingest(12.0, t0));
        assert_eq!(estimator.step_count(), 0);
    }

    #[test]
    fn counts_jolts_above_threshold() {
        let mut estimator = MotionEstimator::default();
        let t0 = Instant::now();
        estimator.ingest(9.5, t0);

        assert!(estimator.ingest(10.25, t0 + Duration::from_millis(400)));
        // 0.5 exactly is not above the threshold
        assert!(!estimator.ingest(9.75, t0 + Duration::from_millis(800)));
        assert!(estimator.ingest(8.5, t0 + Duration::from_millis(1200)));
        assert_eq!(estimator.step_count(), 2);
    }

    #[test]
    fn debounce_drops_steps_that_come_too_fast() {
        let mut estimator = MotionEstimator::default();
        let t0 = Instant::now();
        estimator.ingest(9.8, t0);

        assert!(estimator.ingest(11.0, t0 + Duration::from_millis(100)));
        assert!(!estimator.ingest(9.5, t0 + Duration::from_millis(250)));
        assert!(!estimator.ingest(11.0, t0 + Duration::from_millis(399)));
        assert!(estimator.ingest(9.5, t0 + Duration::from_millis(400)));
        assert_eq!(estimator.step_count(), 2);
    }

    #[test]
    fn ignores_non_finite_samples() {
        let mut estimator = MotionEstimator::default();
        let t0 = Instant::now();
        estimator.ingest(9.8, t0);
        assert!(!estimator.ingest(f64::NAN, t0 + Duration::from_secs(1)));
        assert!(!estimator.ingest(f64::INFINITY, t0 + Duration::from_secs(2)));
        assert!(estimator.ingest(11.0, t0 + Duration::from_secs(3)));
    }

    #[test]
    fn vector_samples_use_their_magnitude() {
        let mut estimator = MotionEstimator::default();
        let t0 = Instant::now();
        estimator.ingest_vector(0.0, 9.8, 0.0, t0);
        assert!(estimator.ingest_vector(3.0, 9.8, 4.0, t0 + Duration::from_secs(1)));

        estimator.reset();
        assert_eq!(estimator.step_count(), 0);
        assert!(!estimator.ingest(30.0, t0 + Duration::from_secs(2)));
    }
}
