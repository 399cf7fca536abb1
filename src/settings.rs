use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::step_model::{
    motion::{DEFAULT_DEBOUNCE, DEFAULT_MOTION_THRESHOLD},
    MotionEstimator, StrideProfile,
};

pub const MIN_HEIGHT_CM: u32 = 120;
pub const MAX_HEIGHT_CM: u32 = 220;
pub const MAX_SPEED_KMH: f64 = 15.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EstimationMode {
    /// Distance from elapsed time and walking speed.
    #[default]
    Timer,
    /// Steps detected from accelerometer samples.
    Motion,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("height must be between 120 and 220 cm, got {0}")]
    Height(u32),
    #[error("walking speed must be above 0 and at most 15 km/h, got {0}")]
    Speed(f64),
    #[error("expected steps per action must be at least 1")]
    ExpectedSteps,
    #[error("motion threshold must be a positive number, got {0}")]
    MotionThreshold(f64),
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
    #[error(transparent)]
    Persist(#[from] anyhow::Error),
}

/// Operator-tunable inputs of the step model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StepSettings {
    pub user_height_cm: u32,
    pub walking_speed_kmh: f64,
    pub expected_steps_per_action: u32,
    pub validation_enabled: bool,
    pub estimation_mode: EstimationMode,
    pub motion_threshold: f64,
    pub motion_debounce_ms: u64,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            user_height_cm: 175,
            walking_speed_kmh: 5.0,
            expected_steps_per_action: 10,
            validation_enabled: true,
            estimation_mode: EstimationMode::Timer,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            motion_debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
        }
    }
}

impl StepSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(MIN_HEIGHT_CM..=MAX_HEIGHT_CM).contains(&self.user_height_cm) {
            return Err(ConfigurationError::Height(self.user_height_cm));
        }
        let speed = self.walking_speed_kmh;
        if !speed.is_finite() || speed <= 0.0 || speed > MAX_SPEED_KMH {
            return Err(ConfigurationError::Speed(speed));
        }
        if self.expected_steps_per_action == 0 {
            return Err(ConfigurationError::ExpectedSteps);
        }
        if !self.motion_threshold.is_finite() || self.motion_threshold <= 0.0 {
            return Err(ConfigurationError::MotionThreshold(self.motion_threshold));
        }
        Ok(())
    }

    pub fn stride_profile(&self) -> StrideProfile {
        StrideProfile::new(self.user_height_cm, self.walking_speed_kmh)
    }

    pub fn motion_estimator(&self) -> MotionEstimator {
        MotionEstimator::new(
            self.motion_threshold,
            Duration::from_millis(self.motion_debounce_ms),
        )
    }

    /// Target attached to manual movement steps when the validation panel is on.
    pub fn expected_steps(&self) -> Option<u32> {
        self.validation_enabled
            .then_some(self.expected_steps_per_action)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    steps: StepSettings,
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    /// Loads settings from `path`, falling back to defaults when the file is missing,
    /// unreadable as JSON, or holds values the step model would reject.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            let parsed: UserSettings = serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                UserSettings::default()
            });
            match parsed.steps.validate() {
                Ok(()) => parsed,
                Err(err) => {
                    warn!("Ignoring invalid step settings at {}: {err}", path.display());
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Settings held in memory only; updates are validated but never written out.
    pub fn ephemeral(steps: StepSettings) -> Self {
        Self {
            path: None,
            data: RwLock::new(UserSettings { steps }),
        }
    }

    pub fn step_settings(&self) -> StepSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .steps
            .clone()
    }

    pub fn update_step_settings(&self, settings: StepSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut guard.steps, settings);
        if let Err(err) = self.persist(&guard) {
            guard.steps = previous;
            return Err(err.into());
        }
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}
