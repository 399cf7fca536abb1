//! SQLite access through a single dedicated worker thread.
//!
//! Callers submit closures with [`Database::execute`] and await the reply, so async
//! code never blocks on SQLite. The same file can serve as the local key-value mirror
//! (`kv_entries`) and as a table store (`rounds` / `round_steps`).

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod repositories;

use migrations::run_migrations;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Close,
}

/// Owns the worker; the last `Database` clone to go away closes the connection.
struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // a send error means the worker already exited
        let _ = self.jobs.send(Message::Close);
        if thread.join().is_err() {
            error!("Database worker panicked");
        }
    }
}

/// Handle to one SQLite file. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or creates) the file and brings its schema up to date before
    /// returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs, inbox) = mpsc::channel::<Message>();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<()>>();
        let worker_path = path.clone();

        let thread = thread::Builder::new()
            .name("patrol-db".into())
            .spawn(move || match open_connection(&worker_path) {
                Ok(mut conn) => {
                    if opened_tx.send(Ok(())).is_ok() {
                        serve(&mut conn, inbox);
                    }
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        let worker = Worker {
            jobs,
            thread: Some(thread),
        };
        opened_rx
            .recv()
            .context("database worker exited while opening")??;

        info!("Opened round database at {}", path.display());
        Ok(Self {
            worker: Arc::new(worker),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Runs `task` on the worker's connection and awaits its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // the caller may have stopped waiting
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("database worker is gone"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the job"))?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("WAL journal unavailable for {}: {err}", path.display());
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(conn: &mut Connection, inbox: mpsc::Receiver<Message>) {
    while let Ok(Message::Run(job)) = inbox.recv() {
        job(conn);
    }
    debug!("Database worker stopped");
}
