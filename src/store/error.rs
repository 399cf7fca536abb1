/// Persistence failures surfaced by [`RoundStore`](super::RoundStore).
///
/// A remote failure that the local backend absorbed is never returned; it only
/// shows up in the logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The table store failed on its own. [`RoundStore`](super::RoundStore) always
    /// falls back, so it reports remote failures inside [`StoreError::Both`].
    #[error("remote store error: {0}")]
    Remote(String),

    /// The local key-value backend failed.
    #[error("local store error: {0}")]
    Local(String),

    /// Both backends failed for the same operation.
    #[error("remote store error: {remote}; local fallback also failed: {local}")]
    Both { remote: String, local: String },
}

impl StoreError {
    pub(crate) fn local(err: anyhow::Error) -> Self {
        StoreError::Local(format!("{err:#}"))
    }
}
