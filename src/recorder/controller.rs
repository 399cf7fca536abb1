use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use super::{RecorderError, RecorderState, RecorderStatus};
use crate::{
    log_debug, log_error, log_info, log_warn,
    models::{now_ms, NewStep, RoundAction, RoundData, RoundStep, StartRound},
    settings::{EstimationMode, SettingsStore},
    step_model::{MotionEstimator, StepEstimate},
    store::{RoundStore, StoreError},
};

const ENABLE_LOGS: bool = true;

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);
const DEBUG_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Pull-based view of the recorder for a host render loop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderSnapshot {
    pub status: RecorderStatus,
    pub round_id: Option<String>,
    pub round_name: Option<String>,
    pub elapsed_ms: u64,
    pub step_events: usize,
    pub total_steps: u32,
    pub mode: Option<EstimationMode>,
    /// Live timer estimate, only in timer mode.
    pub estimate: Option<StepEstimate>,
    pub motion_steps: u32,
    pub motion_available: bool,
}

#[derive(Clone)]
pub struct RoundRecorder {
    state: Arc<Mutex<RecorderState>>,
    store: RoundStore,
    settings: Arc<SettingsStore>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    autosave_interval: Duration,
    /// Finalized rounds neither backend accepted yet.
    pending: Arc<Mutex<Vec<RoundData>>>,
}

impl RoundRecorder {
    pub fn new(store: RoundStore, settings: Arc<SettingsStore>) -> Self {
        let debug_mode = std::env::var("PATROL_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            state: Arc::new(Mutex::new(RecorderState::new())),
            store,
            settings,
            ticker: Arc::new(Mutex::new(None)),
            autosave_interval: if debug_mode {
                DEBUG_AUTOSAVE_INTERVAL
            } else {
                DEFAULT_AUTOSAVE_INTERVAL
            },
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    pub fn store(&self) -> &RoundStore {
        &self.store
    }

    pub async fn status(&self) -> RecorderStatus {
        self.state.lock().await.status()
    }

    pub async fn current_round(&self) -> Option<RoundData> {
        self.state.lock().await.round().cloned()
    }

    pub async fn start_round(&self, options: StartRound) -> Result<RoundData, RecorderError> {
        let settings = self.settings.step_settings();
        let user_id = self.store.session().user_id().map(String::from);

        let round = {
            let mut state = self.state.lock().await;
            let round = RoundData::begin(options, user_id, now_ms());
            state.activate(round, &settings, now_instant())?.clone()
        };

        self.autosave(&round).await;
        self.spawn_ticker().await;

        log_info!(
            "Started round {} ({:?} estimation)",
            round.id,
            settings.estimation_mode
        );
        Ok(round)
    }

    pub async fn add_step(
        &self,
        action: RoundAction,
        direction: Option<String>,
    ) -> Result<RoundStep, RecorderError> {
        let mut input = NewStep::new(action);
        input.direction = direction;
        self.add_step_with(input).await
    }

    pub async fn add_step_with(&self, input: NewStep) -> Result<RoundStep, RecorderError> {
        let (step, snapshot) = {
            let mut state = self.state.lock().await;
            let step = state.append(input, now_instant(), now_ms())?;
            (step, state.round().cloned())
        };

        if let Some(round) = snapshot {
            self.autosave(&round).await;
        }
        Ok(step)
    }

    /// Feeds one accelerometer magnitude; returns the automatic step when one was
    /// recorded. Samples outside motion-mode recording are dropped.
    pub async fn ingest_motion(&self, magnitude: f64) -> Option<RoundStep> {
        let (step, snapshot) = {
            let mut state = self.state.lock().await;
            let step = state.ingest_motion(magnitude, now_instant(), now_ms())?;
            (step, state.round().cloned())
        };

        if let Some(round) = snapshot {
            self.autosave(&round).await;
        }
        Some(step)
    }

    pub async fn ingest_motion_vector(&self, x: f64, y: f64, z: f64) -> Option<RoundStep> {
        self.ingest_motion(MotionEstimator::magnitude(x, y, z)).await
    }

    /// No accelerometer or permission refused: keep recording manual steps only.
    pub async fn mark_motion_unavailable(&self) {
        let mut state = self.state.lock().await;
        if state.motion_available() {
            log_warn!("Motion sensor unavailable, continuing with manual steps only");
        }
        state.set_motion_available(false);
    }

    pub async fn mark_motion_available(&self) {
        self.state.lock().await.set_motion_available(true);
    }

    pub async fn pause(&self) -> Result<(), RecorderError> {
        self.state.lock().await.pause(now_instant())
    }

    pub async fn resume(&self) -> Result<(), RecorderError> {
        self.state.lock().await.resume(now_instant())
    }

    /// Finalizes and saves the active round.
    ///
    /// When saving fails the round stays in the pending list, its recovery snapshot
    /// is kept, and the error hands the finalized round back to the caller.
    pub async fn stop_round(&self) -> Result<RoundData, RecorderError> {
        let round = {
            let mut state = self.state.lock().await;
            state.finish(now_instant(), now_ms())?
        };

        self.cancel_ticker().await;

        match self.store.save(&round).await {
            Ok(()) => {
                self.clear_snapshot(&round.id).await;
                log_info!(
                    "Stopped round {}: {} events, {} steps",
                    round.id,
                    round.steps.len(),
                    round.total_steps
                );
                Ok(round)
            }
            Err(source) => {
                log_error!("Failed to save round {}: {source}", round.id);
                self.pending.lock().await.push(round.clone());
                Err(RecorderError::Persistence {
                    round: Box::new(round),
                    source,
                })
            }
        }
    }

    pub async fn pending_saves(&self) -> Vec<RoundData> {
        self.pending.lock().await.clone()
    }

    /// Saves pending rounds again. Returns how many were saved; rounds that fail
    /// again stay pending and the last error is returned.
    pub async fn retry_pending(&self) -> Result<usize, StoreError> {
        let rounds = std::mem::take(&mut *self.pending.lock().await);
        let mut saved = 0;
        let mut failed = Vec::new();
        let mut last_error = None;

        for round in rounds {
            match self.store.save(&round).await {
                Ok(()) => {
                    self.clear_snapshot(&round.id).await;
                    saved += 1;
                }
                Err(err) => {
                    log_warn!("Retry failed for round {}: {err}", round.id);
                    last_error = Some(err);
                    failed.push(round);
                }
            }
        }

        self.pending.lock().await.extend(failed);
        match last_error {
            Some(err) => Err(err),
            None => Ok(saved),
        }
    }

    /// Recovery snapshots left behind by rounds that never stopped, excluding the
    /// round being recorded now and finalized rounds waiting in the pending list.
    pub async fn pending_recoveries(&self) -> Result<Vec<RoundData>, RecorderError> {
        let active_id = self.state.lock().await.round().map(|round| round.id.clone());
        let pending_ids: Vec<String> = self
            .pending
            .lock()
            .await
            .iter()
            .map(|round| round.id.clone())
            .collect();
        let snapshots = self.store.load_temporary().await?;
        Ok(snapshots
            .into_iter()
            .filter(|round| Some(&round.id) != active_id.as_ref())
            .filter(|round| !pending_ids.contains(&round.id))
            .collect())
    }

    /// Reloads a recovery snapshot as the active round and keeps recording into it.
    pub async fn resume_recovered(&self, round_id: &str) -> Result<RoundData, RecorderError> {
        if self.state.lock().await.status() != RecorderStatus::Idle {
            return Err(RecorderError::AlreadyRecording);
        }

        let round = self.find_recovery(round_id).await?;
        let settings = self.settings.step_settings();
        let round = {
            let mut state = self.state.lock().await;
            state.activate(round, &settings, now_instant())?.clone()
        };

        self.spawn_ticker().await;
        log_info!(
            "Resumed round {} with {} recorded events",
            round.id,
            round.steps.len()
        );
        Ok(round)
    }

    pub async fn discard_recovered(&self, round_id: &str) -> Result<(), RecorderError> {
        let round = self.find_recovery(round_id).await?;
        self.store.clear_temporary(&round.id).await?;
        log_info!("Discarded recovery snapshot for round {}", round.id);
        Ok(())
    }

    pub async fn snapshot(&self) -> RecorderSnapshot {
        let state = self.state.lock().await;
        let round = state.round();

        RecorderSnapshot {
            status: state.status(),
            round_id: round.map(|round| round.id.clone()),
            round_name: round.map(|round| round.name.clone()),
            elapsed_ms: round.map(|round| round.elapsed_ms(now_ms())).unwrap_or(0),
            step_events: round.map(|round| round.steps.len()).unwrap_or(0),
            total_steps: round.map(|round| round.total_steps).unwrap_or(0),
            mode: state.mode(),
            estimate: state.estimate(now_instant()),
            motion_steps: state.motion_steps(),
            motion_available: state.motion_available(),
        }
    }

    async fn find_recovery(&self, round_id: &str) -> Result<RoundData, RecorderError> {
        self.pending_recoveries()
            .await?
            .into_iter()
            .find(|round| round.id == round_id)
            .ok_or_else(|| RecorderError::RecoveryNotFound(round_id.to_string()))
    }

    async fn autosave(&self, round: &RoundData) {
        if let Err(err) = self.store.save_temporary(round).await {
            log_warn!("Failed to snapshot round {}: {err}", round.id);
        }
    }

    async fn clear_snapshot(&self, round_id: &str) {
        if let Err(err) = self.store.clear_temporary(round_id).await {
            log_warn!("Failed to clear recovery snapshot for round {round_id}: {err}");
        }
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        // The task must not keep the recorder state alive once every recorder is gone.
        let weak_state = Arc::downgrade(&self.state);
        let store = self.store.clone();
        let period = self.autosave_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately and start already saved a snapshot
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(state) = weak_state.upgrade() else {
                    log_debug!("Recorder dropped, stopping autosave");
                    break;
                };
                let round = {
                    let guard = state.lock().await;
                    match (guard.status(), guard.round()) {
                        (RecorderStatus::Recording, Some(round)) => round.clone(),
                        (RecorderStatus::Paused, _) => continue,
                        _ => break,
                    }
                };

                match store.save_temporary(&round).await {
                    Ok(()) => log_debug!(
                        "Autosaved round {} ({} events)",
                        round.id,
                        round.steps.len()
                    ),
                    Err(err) => log_warn!("Autosave failed for round {}: {err}", round.id),
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}

/// Monotonic now, read through tokio so a paused test clock drives the estimators.
fn now_instant() -> std::time::Instant {
    time::Instant::now().into_std()
}
