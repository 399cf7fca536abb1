use crate::{models::RoundData, store::StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("a round is already being recorded")]
    AlreadyRecording,

    #[error("no round is being recorded")]
    NotRecording,

    #[error("recording is paused")]
    Paused,

    #[error("no recovery snapshot for round {0}")]
    RecoveryNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The round was finalized but neither backend accepted it. The round is kept in
    /// the recorder's pending list and handed back here as well.
    #[error("finalized round could not be saved: {source}")]
    Persistence {
        round: Box<RoundData>,
        source: StoreError,
    },
}
