use anyhow::Result;
use async_trait::async_trait;

use super::rows::RoundRecord;

/// Relational backend holding `rounds` and `round_steps`, scoped by user.
///
/// Implementations must be `Send + Sync + 'static` so a single instance can be
/// shared between the recorder, its autosave task and the host.
#[async_trait]
pub trait TableStore: Send + Sync + 'static {
    /// Insert or replace the round row and all of its step rows.
    ///
    /// A round id already owned by another user must be rejected.
    async fn upsert_round(&self, record: RoundRecord) -> Result<()>;

    /// Every round owned by `user_id`, steps ordered by `step_number`.
    async fn fetch_rounds(&self, user_id: &str) -> Result<Vec<RoundRecord>>;

    /// Delete a round and its steps. Deleting an unknown id is not an error.
    async fn delete_round(&self, user_id: &str, round_id: &str) -> Result<()>;
}

/// String key-value backend used for the local mirror and crash-recovery snapshots.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Removing a missing key is a no-op.
    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
