use std::sync::Arc;

use anyhow::{Context, Result};
use log::warn;
use tokio::sync::Mutex;

use super::traits::KeyValueStore;
use crate::models::RoundData;

/// Key holding the JSON array of saved rounds.
pub const ROUNDS_KEY: &str = "carnet_securite_rounds";
/// Prefix of the per-round crash-recovery snapshot keys.
pub const TEMP_PREFIX: &str = "carnet_securite_round_temp_";

/// Round documents on top of a [`KeyValueStore`].
///
/// Saved rounds share a single key, so read-modify-write cycles are serialized
/// through `write_lock`.
#[derive(Clone)]
pub struct LocalMirror {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalMirror {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn rounds(&self) -> Result<Vec<RoundData>> {
        match self.kv.get(ROUNDS_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse rounds stored under {ROUNDS_KEY}")),
            None => Ok(Vec::new()),
        }
    }

    pub async fn upsert(&self, round: &RoundData) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut rounds = self.rounds().await?;
        match rounds.iter_mut().find(|existing| existing.id == round.id) {
            Some(existing) => *existing = round.clone(),
            None => rounds.push(round.clone()),
        }
        self.write_rounds(&rounds).await
    }

    /// Returns whether a round was removed.
    pub async fn remove(&self, round_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut rounds = self.rounds().await?;
        let before = rounds.len();
        rounds.retain(|round| round.id != round_id);
        if rounds.len() == before {
            return Ok(false);
        }
        self.write_rounds(&rounds).await?;
        Ok(true)
    }

    pub async fn save_temporary(&self, round: &RoundData) -> Result<()> {
        let serialized = serde_json::to_string(round)?;
        self.kv.set(&temp_key(&round.id), serialized).await
    }

    /// All snapshots that still parse; unreadable ones are logged and skipped.
    pub async fn load_temporary(&self) -> Result<Vec<RoundData>> {
        let mut snapshots = Vec::new();
        for key in self.kv.keys_with_prefix(TEMP_PREFIX).await? {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<RoundData>(&raw) {
                Ok(round) => snapshots.push(round),
                Err(err) => warn!("Skipping unreadable recovery snapshot {key}: {err}"),
            }
        }
        snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(snapshots)
    }

    pub async fn clear_temporary(&self, round_id: &str) -> Result<()> {
        self.kv.remove(&temp_key(round_id)).await
    }

    async fn write_rounds(&self, rounds: &[RoundData]) -> Result<()> {
        let serialized = serde_json::to_string(rounds)?;
        self.kv.set(ROUNDS_KEY, serialized).await
    }
}

fn temp_key(round_id: &str) -> String {
    format!("{TEMP_PREFIX}{round_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_ms, StartRound};
    use crate::store::memory::MemoryKeyValueStore;

    fn mirror() -> (LocalMirror, Arc<MemoryKeyValueStore>) {
        let kv = Arc::new(MemoryKeyValueStore::default());
        (LocalMirror::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let (mirror, _) = mirror();
        let mut round = RoundData::begin(StartRound::default(), None, now_ms());
        mirror.upsert(&round).await.unwrap();

        round.name = "Renamed".into();
        mirror.upsert(&round).await.unwrap();

        let rounds = mirror.rounds().await.unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].name, "Renamed");
    }

    #[tokio::test]
    async fn snapshots_live_under_their_own_prefix() {
        let (mirror, kv) = mirror();
        let round = RoundData::begin(StartRound::default(), None, now_ms());
        mirror.save_temporary(&round).await.unwrap();

        assert!(mirror.rounds().await.unwrap().is_empty());
        let key = format!("{TEMP_PREFIX}{}", round.id);
        assert!(kv.get(&key).await.unwrap().is_some());

        assert_eq!(mirror.load_temporary().await.unwrap(), vec![round.clone()]);
        mirror.clear_temporary(&round.id).await.unwrap();
        assert!(mirror.load_temporary().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_skipped() {
        let (mirror, kv) = mirror();
        kv.set(&format!("{TEMP_PREFIX}broken"), "{".into())
            .await
            .unwrap();
        let round = RoundData::begin(StartRound::default(), None, now_ms());
        mirror.save_temporary(&round).await.unwrap();

        assert_eq!(mirror.load_temporary().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removing_unknown_round_reports_false() {
        let (mirror, _) = mirror();
        assert!(!mirror.remove("missing").await.unwrap());
    }
}
