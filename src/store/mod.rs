//! Round persistence: a remote table store first, the local key-value mirror as
//! fallback, and a local-only namespace for crash-recovery snapshots.

use std::{future::Future, sync::Arc};

use crate::{
    log_error, log_warn,
    models::{select_rounds, RoundData, RoundFilter},
};

mod error;
pub mod local;
pub mod memory;
pub mod rows;
mod traits;

pub use error::StoreError;
pub use local::LocalMirror;
pub use rows::{RoundRecord, RoundRow, StepRow};
pub use traits::{KeyValueStore, TableStore};

const ENABLE_LOGS: bool = true;

/// Identity the store scopes remote reads and writes to.
///
/// Without a user id every operation runs against the local backend only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    user_id: Option<String>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            user_id: (!user_id.trim().is_empty()).then_some(user_id),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

#[derive(Clone)]
pub struct RoundStore {
    local: LocalMirror,
    remote: Option<Arc<dyn TableStore>>,
    session: SessionContext,
}

impl RoundStore {
    pub fn new(
        local: Arc<dyn KeyValueStore>,
        remote: Option<Arc<dyn TableStore>>,
        session: SessionContext,
    ) -> Self {
        Self {
            local: LocalMirror::new(local),
            remote,
            session,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Upsert by `round.id`.
    pub async fn save(&self, round: &RoundData) -> Result<(), StoreError> {
        let remote = self.remote_scope().map(|(table, user_id)| {
            let record = RoundRecord::from_round(round, &user_id);
            async move { table.upsert_round(record).await }
        });

        with_fallback("save", &round.id, remote, self.local.upsert(round))
            .await
            .map(|(value, _)| value)
    }

    /// Rounds visible to the session, most recent first.
    pub async fn load(&self, filter: Option<&RoundFilter>) -> Result<Vec<RoundData>, StoreError> {
        let remote = self.remote_scope().map(|(table, user_id)| async move {
            let records = table.fetch_rounds(&user_id).await?;
            Ok::<_, anyhow::Error>(
                records
                    .into_iter()
                    .map(RoundRecord::into_round)
                    .collect::<Vec<_>>(),
            )
        });
        let local = async {
            let rounds = self.local.rounds().await?;
            Ok::<_, anyhow::Error>(
                rounds
                    .into_iter()
                    .filter(|round| self.visible(round))
                    .collect::<Vec<_>>(),
            )
        };

        let (rounds, _) = with_fallback("load", "rounds", remote, local).await?;
        Ok(select_rounds(rounds, filter))
    }

    /// Deleting an id that exists nowhere succeeds. Only a failure of both
    /// backends is an error.
    pub async fn delete(&self, round_id: &str) -> Result<(), StoreError> {
        let remote = self.remote_scope().map(|(table, user_id)| async move {
            table.delete_round(&user_id, round_id).await?;
            Ok::<_, anyhow::Error>(true)
        });

        if let (false, Some(remote_error)) =
            with_fallback("delete", round_id, remote, self.local.remove(round_id)).await?
        {
            log_warn!(
                "Round {round_id} was not mirrored locally and may still exist remotely: \
                 {remote_error}"
            );
        }
        Ok(())
    }

    pub async fn save_temporary(&self, round: &RoundData) -> Result<(), StoreError> {
        self.local
            .save_temporary(round)
            .await
            .map_err(StoreError::local)
    }

    pub async fn load_temporary(&self) -> Result<Vec<RoundData>, StoreError> {
        let snapshots = self
            .local
            .load_temporary()
            .await
            .map_err(StoreError::local)?;
        Ok(snapshots
            .into_iter()
            .filter(|round| self.visible(round))
            .collect())
    }

    pub async fn clear_temporary(&self, round_id: &str) -> Result<(), StoreError> {
        self.local
            .clear_temporary(round_id)
            .await
            .map_err(StoreError::local)
    }

    fn remote_scope(&self) -> Option<(Arc<dyn TableStore>, String)> {
        let table = self.remote.as_ref()?;
        let user_id = self.session.user_id()?;
        Some((Arc::clone(table), user_id.to_string()))
    }

    /// Local rounds owned by another user are hidden from this session.
    fn visible(&self, round: &RoundData) -> bool {
        match round.user_id.as_deref() {
            Some(owner) => self.session.user_id() == Some(owner),
            None => true,
        }
    }
}

/// Runs `remote` when present and falls back to `local` if it fails.
///
/// Returns the value along with the absorbed remote error, if any.
async fn with_fallback<T, R, L>(
    operation: &str,
    subject: &str,
    remote: Option<R>,
    local: L,
) -> Result<(T, Option<String>), StoreError>
where
    R: Future<Output = anyhow::Result<T>>,
    L: Future<Output = anyhow::Result<T>>,
{
    let Some(remote) = remote else {
        return local
            .await
            .map(|value| (value, None))
            .map_err(StoreError::local);
    };

    let remote_error = match remote.await {
        Ok(value) => return Ok((value, None)),
        Err(err) => format!("{err:#}"),
    };
    log_warn!("Remote {operation} failed for {subject}, using local store: {remote_error}");

    match local.await {
        Ok(value) => Ok((value, Some(remote_error))),
        Err(err) => {
            let local_error = format!("{err:#}");
            log_error!("Local {operation} failed for {subject}: {local_error}");
            Err(StoreError::Both {
                remote: remote_error,
                local: local_error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_ms, NewStep, RoundAction, RoundStep, StartRound, StatusFilter};
    use crate::store::memory::{MemoryKeyValueStore, MemoryTableStore};
    use chrono::Duration;

    struct Harness {
        kv: Arc<MemoryKeyValueStore>,
        table: Arc<MemoryTableStore>,
        store: RoundStore,
    }

    fn harness(session: SessionContext) -> Harness {
        let kv = Arc::new(MemoryKeyValueStore::default());
        let table = Arc::new(MemoryTableStore::default());
        let store = RoundStore::new(kv.clone(), Some(table.clone()), session);
        Harness { kv, table, store }
    }

    fn completed_round(user: Option<&str>, minutes_ago: i64) -> RoundData {
        let start = now_ms() - Duration::minutes(minutes_ago);
        let mut round = RoundData::begin(StartRound::default(), user.map(String::from), start);
        round.push_step(RoundStep::record(
            NewStep::new(RoundAction::Forward).direction("north"),
            2,
            Some(1.45),
            Some(10),
            start,
        ));
        round.push_step(RoundStep::record(
            NewStep::new(RoundAction::CheckPoints),
            0,
            None,
            None,
            start,
        ));
        round.finalize(start + Duration::seconds(30));
        round
    }

    #[tokio::test]
    async fn remote_round_trip_preserves_every_field() {
        let h = harness(SessionContext::for_user("agent-1"));
        let round = completed_round(Some("agent-1"), 5);

        h.store.save(&round).await.unwrap();
        assert_eq!(h.table.len(), 1);
        assert_eq!(h.store.load(None).await.unwrap(), vec![round]);
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_local() {
        let h = harness(SessionContext::for_user("agent-1"));
        h.table.set_unavailable(true);
        let round = completed_round(Some("agent-1"), 5);

        h.store.save(&round).await.unwrap();
        assert!(h.table.is_empty());
        assert_eq!(h.store.load(None).await.unwrap(), vec![round]);
    }

    #[tokio::test]
    async fn both_backends_failing_is_surfaced() {
        let h = harness(SessionContext::for_user("agent-1"));
        h.table.set_unavailable(true);
        h.kv.set_unavailable(true);

        let err = h
            .store
            .save(&completed_round(Some("agent-1"), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Both { .. }));
    }

    #[tokio::test]
    async fn anonymous_session_never_touches_remote() {
        let h = harness(SessionContext::anonymous());
        let round = completed_round(None, 1);

        h.store.save(&round).await.unwrap();
        assert!(h.table.is_empty());
        assert_eq!(h.store.load(None).await.unwrap(), vec![round.clone()]);

        h.kv.set_unavailable(true);
        let err = h.store.load(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Local(_)));
    }

    #[tokio::test]
    async fn load_orders_and_filters() {
        let h = harness(SessionContext::anonymous());
        let older = completed_round(None, 60);
        let newer = completed_round(None, 5);
        let mut open = RoundData::begin(StartRound::default(), None, now_ms());
        open.name = "Parking level 2".into();
        for round in [&older, &newer, &open] {
            h.store.save(round).await.unwrap();
        }

        let ids: Vec<_> = h
            .store
            .load(None)
            .await
            .unwrap()
            .into_iter()
            .map(|round| round.id)
            .collect();
        assert_eq!(ids, vec![open.id.clone(), newer.id.clone(), older.id.clone()]);

        let filter = RoundFilter {
            status: StatusFilter::Incomplete,
            query: Some("parking".into()),
            ..RoundFilter::default()
        };
        let matched = h.store.load(Some(&filter)).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, open.id);
    }

    #[tokio::test]
    async fn delete_falls_back_when_the_remote_is_down() {
        let h = harness(SessionContext::for_user("agent-1"));
        let remote_round = completed_round(Some("agent-1"), 10);
        h.store.save(&remote_round).await.unwrap();

        h.table.set_unavailable(true);
        let local_round = completed_round(Some("agent-1"), 5);
        h.store.save(&local_round).await.unwrap();

        h.store.delete(&local_round.id).await.unwrap();
        assert!(h.store.load(None).await.unwrap().is_empty());

        // only mirrored remotely: the local side succeeds, so the delete does too
        h.store.delete(&remote_round.id).await.unwrap();
        assert_eq!(h.table.len(), 1);

        h.table.set_unavailable(false);
        h.store.delete(&remote_round.id).await.unwrap();
        assert!(h.table.is_empty());

        h.kv.set_unavailable(true);
        h.table.set_unavailable(true);
        let err = h.store.delete(&remote_round.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Both { .. }));
    }

    #[tokio::test]
    async fn local_rounds_of_other_users_are_hidden() {
        let kv = Arc::new(MemoryKeyValueStore::default());
        let first = RoundStore::new(kv.clone(), None, SessionContext::anonymous());
        let round = completed_round(Some("agent-2"), 1);
        first.save(&round).await.unwrap();

        let other = RoundStore::new(kv.clone(), None, SessionContext::for_user("agent-1"));
        assert!(other.load(None).await.unwrap().is_empty());

        let owner = RoundStore::new(kv, None, SessionContext::for_user("agent-2"));
        assert_eq!(owner.load(None).await.unwrap(), vec![round]);
    }
}
