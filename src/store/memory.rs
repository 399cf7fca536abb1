//! In-process backends for tests and offline runs.
//!
//! Both can be switched to fail every call, which is how the fallback paths are
//! exercised.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{
    rows::RoundRecord,
    traits::{KeyValueStore, TableStore},
};

#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("key-value store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTableStore {
    rounds: Mutex<BTreeMap<String, RoundRecord>>,
    unavailable: AtomicBool,
}

impl MemoryTableStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rounds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("table store unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn upsert_round(&self, record: RoundRecord) -> Result<()> {
        self.check()?;
        let mut rounds = self.rounds.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = rounds.get(&record.round.id) {
            if existing.round.user_id != record.round.user_id {
                bail!("round {} belongs to another user", record.round.id);
            }
        }
        rounds.insert(record.round.id.clone(), record);
        Ok(())
    }

    async fn fetch_rounds(&self, user_id: &str) -> Result<Vec<RoundRecord>> {
        self.check()?;
        let rounds = self.rounds.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rounds
            .values()
            .filter(|record| record.round.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_round(&self, user_id: &str, round_id: &str) -> Result<()> {
        self.check()?;
        let mut rounds = self.rounds.lock().unwrap_or_else(PoisonError::into_inner);
        if rounds
            .get(round_id)
            .is_some_and(|record| record.round.user_id == user_id)
        {
            rounds.remove(round_id);
        }
        Ok(())
    }
}
