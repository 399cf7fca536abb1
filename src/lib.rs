mod commands;
pub mod db;
pub mod models;
pub mod recorder;
pub mod replay;
pub mod settings;
pub mod step_model;
pub mod store;
mod utils;

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};

pub use commands::{execute, Command, HELP};
use db::Database;
use recorder::RoundRecorder;
use replay::{LogNarrator, Narrator, ReplaySession};
use settings::SettingsStore;
use store::{KeyValueStore, RoundStore, SessionContext, TableStore};

const DATA_DIR_ENV: &str = "PATROL_DATA_DIR";
const TABLE_STORE_ENV: &str = "PATROL_TABLE_STORE";
const USER_ID_ENV: &str = "PATROL_USER_ID";
const DEFAULT_DATA_DIR: &str = ".patrol-notebook";

/// Everything a command needs: the recorder, the store it writes to, settings and
/// the replay currently open, if any.
pub struct AppState {
    pub recorder: RoundRecorder,
    pub store: RoundStore,
    pub settings: Arc<SettingsStore>,
    pub narrator: Arc<dyn Narrator>,
    replay: Mutex<Option<ReplaySession>>,
}

impl AppState {
    pub fn new(store: RoundStore, settings: Arc<SettingsStore>, narrator: Arc<dyn Narrator>) -> Self {
        Self {
            recorder: RoundRecorder::new(store.clone(), settings.clone()),
            store,
            settings,
            narrator,
            replay: Mutex::new(None),
        }
    }

    /// Replaces the open replay, closing the previous one.
    pub async fn open_replay(&self, session: ReplaySession) {
        let previous = self.replay.lock().await.replace(session);
        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    pub async fn replay(&self) -> Result<ReplaySession> {
        self.replay
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("no replay open, use 'replay <id>' first"))
    }

    pub async fn close_replay(&self) {
        let session = self.replay.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Patrol notebook starting up...");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_host())
}

async fn run_host() -> Result<()> {
    let data_dir = env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    std::fs::create_dir_all(&data_dir)?;

    let local: Arc<dyn KeyValueStore> = Arc::new(Database::new(data_dir.join("patrol.sqlite3"))?);
    let remote = match env::var_os(TABLE_STORE_ENV) {
        Some(path) => {
            info!("Using table store at {}", PathBuf::from(&path).display());
            Some(Arc::new(Database::new(PathBuf::from(path))?) as Arc<dyn TableStore>)
        }
        None => None,
    };
    let session = env::var(USER_ID_ENV)
        .map(SessionContext::for_user)
        .unwrap_or_default();
    if session.user_id().is_none() {
        info!("No user id set; rounds are kept on this device only");
    }

    let settings = Arc::new(SettingsStore::new(data_dir.join("settings.json"))?);
    let state = AppState::new(
        RoundStore::new(local, remote, session),
        settings,
        Arc::new(LogNarrator),
    );

    // Rounds that were still recording when the host last went down.
    let interrupted = state.recorder.pending_recoveries().await?;
    if !interrupted.is_empty() {
        warn!(
            "Found {} interrupted round(s); use 'recoveries' to restore or discard them",
            interrupted.len()
        );
    }

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout.write_all(b"Type 'help' for commands.\n> ").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let reply = match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => match execute(&state, command).await {
                Ok(reply) => reply,
                Err(err) => format!("error: {err:#}"),
            },
            Ok(None) => String::new(),
            Err(err) => format!("error: {err:#}"),
        };
        if !reply.is_empty() {
            stdout.write_all(reply.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    state.close_replay().await;
    if state.recorder.status().await != recorder::RecorderStatus::Idle {
        warn!("Exiting with a round still recording; it can be restored on next start");
    }
    let pending = state.recorder.pending_saves().await;
    if !pending.is_empty() {
        warn!("{} completed round(s) were never saved remotely", pending.len());
    }
    Ok(())
}
