use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecorderError;
use crate::{
    models::{NewStep, RoundAction, RoundData, RoundStep},
    settings::{EstimationMode, StepSettings},
    step_model::{MotionEstimator, StepEstimate, TimerEstimator},
};

/// Direction recorded on steps appended by the motion estimator.
pub const AUTOMATIC_DIRECTION: &str = "automatic";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RecorderStatus {
    #[default]
    Idle,
    Recording,
    Paused,
}

/// Everything tied to the round currently being recorded.
#[derive(Debug)]
struct ActiveRound {
    round: RoundData,
    paused: bool,
    mode: EstimationMode,
    timer: TimerEstimator,
    motion: MotionEstimator,
    /// Part of the timer estimate already handed out to earlier movement steps.
    attributed: StepEstimate,
    expected_steps: Option<u32>,
}

/// The single active-round slot plus device-level flags.
#[derive(Debug)]
pub struct RecorderState {
    active: Option<ActiveRound>,
    motion_available: bool,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self {
            active: None,
            motion_available: true,
        }
    }
}

impl RecorderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> RecorderStatus {
        match &self.active {
            None => RecorderStatus::Idle,
            Some(active) if active.paused => RecorderStatus::Paused,
            Some(_) => RecorderStatus::Recording,
        }
    }

    pub fn round(&self) -> Option<&RoundData> {
        self.active.as_ref().map(|active| &active.round)
    }

    pub fn mode(&self) -> Option<EstimationMode> {
        self.active.as_ref().map(|active| active.mode)
    }

    pub fn motion_available(&self) -> bool {
        self.motion_available
    }

    pub fn set_motion_available(&mut self, available: bool) {
        self.motion_available = available;
    }

    /// Makes `round` the active round with fresh counters and estimators.
    ///
    /// Used both for new rounds and for rounds reloaded from a recovery snapshot;
    /// in the latter case the steps already recorded are kept as they are.
    pub fn activate(
        &mut self,
        round: RoundData,
        settings: &StepSettings,
        now: Instant,
    ) -> Result<&RoundData, RecorderError> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let mut timer = TimerEstimator::new(settings.stride_profile());
        if settings.estimation_mode == EstimationMode::Timer {
            timer.start(now);
        }

        let active = self.active.insert(ActiveRound {
            round,
            paused: false,
            mode: settings.estimation_mode,
            timer,
            motion: settings.motion_estimator(),
            attributed: StepEstimate::default(),
            expected_steps: settings.expected_steps(),
        });
        Ok(&active.round)
    }

    /// Appends one manual step.
    ///
    /// In timer mode a movement step receives the distance and whole steps walked
    /// since the previous movement step. In motion mode walking is already logged
    /// by automatic steps, so manual movement steps carry no count.
    pub fn append(
        &mut self,
        input: NewStep,
        now: Instant,
        timestamp: DateTime<Utc>,
    ) -> Result<RoundStep, RecorderError> {
        let active = self.active.as_mut().ok_or(RecorderError::NotRecording)?;
        if active.paused {
            return Err(RecorderError::Paused);
        }

        let (steps, distance) = if input.action.is_movement() && active.mode == EstimationMode::Timer
        {
            let current = active.timer.estimate(now);
            let steps = current
                .step_count
                .saturating_sub(active.attributed.step_count);
            let distance = round_centimeters(current.distance_m - active.attributed.distance_m);
            active.attributed = current;
            (steps, Some(distance))
        } else {
            (0, None)
        };

        let step = RoundStep::record(input, steps, distance, active.expected_steps, timestamp);
        active.round.push_step(step.clone());
        Ok(step)
    }

    /// Feeds one accelerometer magnitude. Returns the automatic `Walk` step when the
    /// sample is accepted.
    pub fn ingest_motion(
        &mut self,
        magnitude: f64,
        now: Instant,
        timestamp: DateTime<Utc>,
    ) -> Option<RoundStep> {
        if !self.motion_available {
            return None;
        }
        let active = self.active.as_mut()?;
        if active.paused || active.mode != EstimationMode::Motion {
            return None;
        }
        if !active.motion.ingest(magnitude, now) {
            return None;
        }

        let step = RoundStep::record(
            NewStep::new(RoundAction::Walk).direction(AUTOMATIC_DIRECTION),
            1,
            None,
            None,
            timestamp,
        );
        active.round.push_step(step.clone());
        Some(step)
    }

    /// Pausing an already paused round is a no-op.
    pub fn pause(&mut self, now: Instant) -> Result<(), RecorderError> {
        let active = self.active.as_mut().ok_or(RecorderError::NotRecording)?;
        if !active.paused {
            active.timer.pause(now);
            active.paused = true;
        }
        Ok(())
    }

    pub fn resume(&mut self, now: Instant) -> Result<(), RecorderError> {
        let active = self.active.as_mut().ok_or(RecorderError::NotRecording)?;
        if active.paused {
            active.timer.resume(now);
            active.paused = false;
        }
        Ok(())
    }

    /// Freezes the estimator, finalizes the round and empties the slot.
    pub fn finish(
        &mut self,
        now: Instant,
        end_time: DateTime<Utc>,
    ) -> Result<RoundData, RecorderError> {
        let mut active = self.active.take().ok_or(RecorderError::NotRecording)?;
        active.timer.stop(now);
        active.round.finalize(end_time);
        Ok(active.round)
    }

    /// Live timer reading, `None` outside timer mode.
    pub fn estimate(&self, now: Instant) -> Option<StepEstimate> {
        let active = self.active.as_ref()?;
        (active.mode == EstimationMode::Timer).then(|| active.timer.estimate(now))
    }

    pub fn motion_steps(&self) -> u32 {
        self.active
            .as_ref()
            .map(|active| active.motion.step_count())
            .unwrap_or(0)
    }
}

fn round_centimeters(distance_m: f64) -> f64 {
    ((distance_m * 100.0).round() / 100.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_ms, StartRound};
    use std::time::Duration;

    fn begin(state: &mut RecorderState, settings: &StepSettings, now: Instant) -> String {
        let round = RoundData::begin(StartRound::default(), None, now_ms());
        state.activate(round, settings, now).unwrap().id.clone()
    }

    #[test]
    fn timer_mode_attributes_walked_steps_between_movements() {
        let settings = StepSettings::default();
        let mut state = RecorderState::new();
        let t0 = Instant::now();
        begin(&mut state, &settings, t0);

        let first = state
            .append(
                NewStep::new(RoundAction::Forward),
                t0 + Duration::from_secs(10),
                now_ms(),
            )
            .unwrap();
        assert_eq!(first.steps, 19);
        assert_eq!(first.distance, Some(13.89));
        assert_eq!(first.expected_steps, Some(10));

        let marker = state
            .append(
                NewStep::new(RoundAction::CheckPoints),
                t0 + Duration::from_secs(12),
                now_ms(),
            )
            .unwrap();
        assert_eq!(marker.steps, 0);
        assert_eq!(marker.distance, None);

        let second = state
            .append(
                NewStep::new(RoundAction::Left),
                t0 + Duration::from_secs(15),
                now_ms(),
            )
            .unwrap();
        assert_eq!(second.steps, 9);
        assert_eq!(second.distance, Some(6.94));

        let round = state.round().unwrap();
        assert_eq!(round.total_steps, 28);
        assert_eq!(round.total_steps, round.recount_steps());
    }

    #[test]
    fn second_activation_leaves_state_untouched() {
        let settings = StepSettings::default();
        let mut state = RecorderState::new();
        let id = begin(&mut state, &settings, Instant::now());

        let other = RoundData::begin(StartRound::default(), None, now_ms());
        assert!(matches!(
            state.activate(other, &settings, Instant::now()),
            Err(RecorderError::AlreadyRecording)
        ));
        assert_eq!(state.round().unwrap().id, id);
        assert_eq!(state.status(), RecorderStatus::Recording);
    }

    #[test]
    fn pause_freezes_the_timer_and_blocks_appends() {
        let settings = StepSettings::default();
        let mut state = RecorderState::new();
        let t0 = Instant::now();
        begin(&mut state, &settings, t0);

        state.pause(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(state.status(), RecorderStatus::Paused);
        assert!(matches!(
            state.append(NewStep::new(RoundAction::Forward), t0, now_ms()),
            Err(RecorderError::Paused)
        ));

        // a minute away from the round does not count as walking
        state.resume(t0 + Duration::from_secs(70)).unwrap();
        let step = state
            .append(
                NewStep::new(RoundAction::Forward),
                t0 + Duration::from_secs(70),
                now_ms(),
            )
            .unwrap();
        assert_eq!(step.steps, 19);
    }

    #[test]
    fn motion_samples_append_walk_steps() {
        let settings = StepSettings {
            estimation_mode: EstimationMode::Motion,
            ..StepSettings::default()
        };
        let mut state = RecorderState::new();
        let t0 = Instant::now();
        begin(&mut state, &settings, t0);

        assert!(state.ingest_motion(9.5, t0, now_ms()).is_none());
        let walk = state
            .ingest_motion(10.25, t0 + Duration::from_millis(400), now_ms())
            .unwrap();
        assert_eq!(walk.action, RoundAction::Walk);
        assert_eq!(walk.direction.as_deref(), Some(AUTOMATIC_DIRECTION));
        assert_eq!(walk.steps, 1);

        let manual = state
            .append(NewStep::new(RoundAction::Right), t0, now_ms())
            .unwrap();
        assert_eq!(manual.steps, 0);
        assert_eq!(manual.distance, None);

        state.set_motion_available(false);
        assert!(state
            .ingest_motion(5.0, t0 + Duration::from_secs(2), now_ms())
            .is_none());
        assert_eq!(state.round().unwrap().total_steps, 1);
        assert_eq!(state.motion_steps(), 1);
    }

    #[test]
    fn timer_mode_ignores_motion_samples() {
        let settings = StepSettings::default();
        let mut state = RecorderState::new();
        let t0 = Instant::now();
        begin(&mut state, &settings, t0);

        assert!(state.ingest_motion(9.5, t0, now_ms()).is_none());
        assert!(state
            .ingest_motion(12.0, t0 + Duration::from_secs(1), now_ms())
            .is_none());
        assert!(state.round().unwrap().steps.is_empty());
    }

    #[test]
    fn finish_empties_the_slot() {
        let settings = StepSettings::default();
        let mut state = RecorderState::new();
        let t0 = Instant::now();
        begin(&mut state, &settings, t0);
        state.pause(t0).unwrap();

        let round = state.finish(t0, now_ms()).unwrap();
        assert!(round.is_completed);
        assert_eq!(state.status(), RecorderStatus::Idle);
        assert!(matches!(
            state.finish(t0, now_ms()),
            Err(RecorderError::NotRecording)
        ));
    }
}
