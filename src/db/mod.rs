//! SQLite-backed session recorder.
//!
//! One dedicated thread owns the connection. Async callers hand it closures
//! over a channel and await the reply on a oneshot.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

use migrations::run_migrations;

pub use models::{Session, SessionListItem, TopApp};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(DbJob),
    Stop,
}

/// Where the recorder keeps its data.
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    fn open(&self) -> Result<Connection> {
        let conn = match self {
            Location::File(path) => {
                let conn = Connection::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    warn!("WAL unavailable, keeping default journal: {err}");
                }
                conn
            }
            Location::Memory => Connection::open_in_memory()?,
        };

        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn describe(&self) -> String {
        match self {
            Location::File(path) => path.display().to_string(),
            Location::Memory => ":memory:".into(),
        }
    }
}

struct Worker {
    sender: mpsc::Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        // The worker may already be gone if it failed to start.
        let _ = self.sender.send(WorkerMessage::Stop);
        if handle.join().is_err() {
            error!("Recorder thread panicked");
        }
    }
}

#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    location: Arc<Location>,
}

impl Database {
    /// Open (or create) the database file and migrate it.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        Self::spawn(Location::File(db_path))
    }

    /// A private database that vanishes with the last handle.
    pub fn in_memory() -> Result<Self> {
        Self::spawn(Location::Memory)
    }

    fn spawn(location: Location) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<WorkerMessage>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_location = location.clone();

        let handle = thread::Builder::new()
            .name("pomoguard-db".into())
            .spawn(move || {
                let mut conn = match thread_location.open().and_then(|mut conn| {
                    run_migrations(&mut conn).context("failed to run database migrations")?;
                    Ok(conn)
                }) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }

                while let Ok(message) = receiver.recv() {
                    match message {
                        WorkerMessage::Run(job) => job(&mut conn),
                        WorkerMessage::Stop => break,
                    }
                }
                info!("Recorder thread stopped");
            })
            .context("failed to spawn database worker thread")?;

        let worker = Arc::new(Worker {
            sender,
            thread: Mutex::new(Some(handle)),
        });

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Session recorder ready at {}", location.describe());
        Ok(Self {
            worker,
            location: Arc::new(location),
        })
    }

    /// File backing this database, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        match self.location.as_ref() {
            Location::File(path) => Some(path.as_path()),
            Location::Memory => None,
        }
    }

    /// Run `task` on the recorder thread.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: DbJob = Box::new(move |conn| {
            // A dropped receiver means the caller stopped waiting.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .sender
            .send(WorkerMessage::Run(job))
            .map_err(|_| anyhow!("recorder thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("recorder thread dropped the request"))?
    }
}
