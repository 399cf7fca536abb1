use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    cursor::ReplayCursor,
    narration::{narrate, Narrator},
};
use crate::{
    log_debug, log_error,
    models::{RoundData, RoundStep},
};

const ENABLE_LOGS: bool = true;

/// Auto-advance period of guided (voice) replay.
pub const GUIDED_INTERVAL: Duration = Duration::from_millis(3000);

struct Autoplay {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A replay cursor shared between the operator and an optional autoplay task.
#[derive(Clone)]
pub struct ReplaySession {
    cursor: Arc<Mutex<ReplayCursor>>,
    narrator: Option<Arc<dyn Narrator>>,
    autoplay: Arc<Mutex<Option<Autoplay>>>,
}

impl ReplaySession {
    pub fn new(round: RoundData) -> Self {
        Self::build(round, None)
    }

    /// Every move onto a new step is narrated.
    pub fn with_narrator(round: RoundData, narrator: Arc<dyn Narrator>) -> Self {
        Self::build(round, Some(narrator))
    }

    /// Narrated replay advancing on its own every [`GUIDED_INTERVAL`], starting with
    /// the instruction for the first step.
    pub async fn guided(round: RoundData, narrator: Arc<dyn Narrator>) -> Self {
        let session = Self::with_narrator(round, narrator);
        session.narrate_current().await;
        session.autoplay(GUIDED_INTERVAL).await;
        session
    }

    fn build(round: RoundData, narrator: Option<Arc<dyn Narrator>>) -> Self {
        Self {
            cursor: Arc::new(Mutex::new(ReplayCursor::new(Arc::new(round)))),
            narrator,
            autoplay: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn cursor(&self) -> ReplayCursor {
        self.cursor.lock().await.clone()
    }

    pub async fn current(&self) -> Option<RoundStep> {
        self.cursor.lock().await.current().cloned()
    }

    pub async fn position(&self) -> usize {
        self.cursor.lock().await.position()
    }

    pub async fn len(&self) -> usize {
        self.cursor.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cursor.lock().await.is_empty()
    }

    pub async fn at_start(&self) -> bool {
        self.cursor.lock().await.at_start()
    }

    pub async fn at_end(&self) -> bool {
        self.cursor.lock().await.at_end()
    }

    pub async fn progress(&self) -> f64 {
        self.cursor.lock().await.progress()
    }

    pub async fn next(&self) -> Option<RoundStep> {
        self.move_cursor(ReplayCursor::next).await
    }

    pub async fn previous(&self) -> Option<RoundStep> {
        self.move_cursor(ReplayCursor::previous).await
    }

    pub async fn jump_to(&self, index: usize) -> Option<RoundStep> {
        self.move_cursor(|cursor| {
            let before = cursor.position();
            cursor.jump_to(index);
            cursor.position() != before
        })
        .await
    }

    pub async fn rewind(&self) -> Option<RoundStep> {
        self.move_cursor(|cursor| {
            let moved = !cursor.at_start();
            cursor.rewind();
            moved
        })
        .await
    }

    /// Ticks off the current step and moves to the next one.
    pub async fn mark_current_completed(&self) -> Option<RoundStep> {
        self.move_cursor(|cursor| {
            let before = cursor.position();
            cursor.mark_current_completed();
            cursor.position() != before
        })
        .await
    }

    pub async fn completed_count(&self) -> usize {
        self.cursor.lock().await.completed_count()
    }

    pub async fn narrate_current(&self) {
        let Some(narrator) = &self.narrator else {
            return;
        };
        let cursor = self.cursor.lock().await;
        narrate_position(narrator.as_ref(), &cursor);
    }

    /// Advances one step every `interval` until the last step, then stops by itself.
    /// Replaces any autoplay already running.
    pub async fn autoplay(&self, interval: Duration) {
        self.stop_autoplay().await;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(autoplay_loop(
            self.cursor.clone(),
            self.narrator.clone(),
            interval,
            cancel_token.clone(),
        ));

        *self.autoplay.lock().await = Some(Autoplay {
            cancel_token,
            handle,
        });
    }

    /// Cancels autoplay and waits for the task to exit; the cursor stays where it is.
    pub async fn stop_autoplay(&self) {
        let Some(autoplay) = self.autoplay.lock().await.take() else {
            return;
        };
        autoplay.cancel_token.cancel();
        if let Err(err) = autoplay.handle.await {
            log_error!("Autoplay task failed to join: {err}");
        }
    }

    pub async fn is_autoplaying(&self) -> bool {
        self.autoplay
            .lock()
            .await
            .as_ref()
            .is_some_and(|autoplay| !autoplay.handle.is_finished())
    }

    /// Stops autoplay and any narration in flight.
    pub async fn close(&self) {
        self.stop_autoplay().await;
        if let Some(narrator) = &self.narrator {
            narrator.cancel();
        }
    }

    async fn move_cursor<F>(&self, apply: F) -> Option<RoundStep>
    where
        F: FnOnce(&mut ReplayCursor) -> bool,
    {
        let mut cursor = self.cursor.lock().await;
        if apply(&mut cursor) {
            if let Some(narrator) = &self.narrator {
                narrate_position(narrator.as_ref(), &cursor);
            }
        }
        cursor.current().cloned()
    }
}

fn narrate_position(narrator: &dyn Narrator, cursor: &ReplayCursor) {
    if let Some(step) = cursor.current() {
        narrate(narrator, step, cursor.position(), cursor.len());
    }
}

async fn autoplay_loop(
    cursor: Arc<Mutex<ReplayCursor>>,
    narrator: Option<Arc<dyn Narrator>>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if cursor.lock().await.at_end() {
            break;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_debug!("Autoplay cancelled");
                break;
            }
            _ = ticker.tick() => {
                let mut guard = cursor.lock().await;
                if guard.next() {
                    if let Some(narrator) = &narrator {
                        narrate_position(narrator.as_ref(), &guard);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_ms, NewStep, RoundAction, StartRound};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNarrator {
        sentences: StdMutex<Vec<String>>,
        cancels: StdMutex<usize>,
    }

    impl RecordingNarrator {
        fn sentences(&self) -> Vec<String> {
            self.sentences.lock().unwrap().clone()
        }
    }

    impl Narrator for RecordingNarrator {
        fn speak(&self, sentence: &str, locale: &str) -> anyhow::Result<()> {
            assert_eq!(locale, "fr-FR");
            self.sentences.lock().unwrap().push(sentence.to_string());
            Ok(())
        }

        fn cancel(&self) {
            *self.cancels.lock().unwrap() += 1;
        }
    }

    fn round_of(count: usize) -> RoundData {
        let mut round = RoundData::begin(StartRound::default(), None, now_ms());
        for _ in 0..count {
            round.push_step(RoundStep::record(
                NewStep::new(RoundAction::Forward),
                3,
                None,
                None,
                now_ms(),
            ));
        }
        round.finalize(now_ms());
        round
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_advances_to_the_end_and_stops() {
        let narrator = Arc::new(RecordingNarrator::default());
        let session = ReplaySession::with_narrator(round_of(4), narrator.clone());

        session.autoplay(Duration::from_millis(100)).await;
        assert!(session.is_autoplaying().await);

        time::sleep(Duration::from_secs(1)).await;
        assert!(session.at_end().await);
        assert_eq!(session.position().await, 3);
        assert_eq!(narrator.sentences().len(), 3);
        assert!(!session.is_autoplaying().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_autoplay_freezes_the_cursor() {
        let session = ReplaySession::new(round_of(5));
        session.autoplay(Duration::from_millis(100)).await;

        time::sleep(Duration::from_millis(150)).await;
        session.stop_autoplay().await;
        assert_eq!(session.position().await, 1);

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.position().await, 1);
        assert!(!session.is_autoplaying().await);
    }

    #[tokio::test(start_paused = true)]
    async fn guided_replay_narrates_every_step() {
        let narrator = Arc::new(RecordingNarrator::default());
        let session = ReplaySession::guided(round_of(3), narrator.clone()).await;
        assert_eq!(narrator.sentences().len(), 1);

        time::sleep(GUIDED_INTERVAL * 3).await;
        let sentences = narrator.sentences();
        assert_eq!(sentences.len(), 3);
        assert!(sentences[0].starts_with("Étape 1 sur 3."));
        assert!(sentences[2].starts_with("Étape 3 sur 3."));

        session.close().await;
        assert_eq!(*narrator.cancels.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_round_never_narrates() {
        let narrator = Arc::new(RecordingNarrator::default());
        let session = ReplaySession::guided(round_of(0), narrator.clone()).await;

        time::sleep(GUIDED_INTERVAL * 2).await;
        assert!(session.at_end().await);
        assert!(session.current().await.is_none());
        assert!(narrator.sentences().is_empty());
    }

    #[tokio::test]
    async fn manual_moves_are_bounded() {
        let session = ReplaySession::new(round_of(2));
        assert!(session.previous().await.is_some());
        assert_eq!(session.position().await, 0);

        session.next().await;
        session.next().await;
        assert_eq!(session.position().await, 1);
        assert!(session.at_end().await);

        session.rewind().await;
        session.mark_current_completed().await;
        assert_eq!(session.completed_count().await, 1);
        assert_eq!(session.position().await, 1);
    }
}
