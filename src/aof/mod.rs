//! Append-Only File (AOF) persistence module
//!
//! Provides durability by logging all write commands to disk as RESP
//! command frames. A single writer thread owns the file; producers enqueue
//! records through [`AofHandler::add_aof`] or a per-database [`AofSink`].

mod replay;
mod writer;

pub use replay::{replay_entries, replay_file, ReplayStats};
pub use writer::AofWriter;

use crate::connection::Connection;
use crate::protocol::Reply;
use bytes::Bytes;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Records buffered between producers and the writer thread
const AOF_QUEUE_SIZE: usize = 1 << 16;

/// AOF sync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    Always,
    /// Sync every second (balanced)
    #[default]
    #[serde(rename = "everysec")]
    EverySecond,
    /// Let the OS decide when to sync (fastest, least safe)
    No,
}

/// AOF configuration, the `[aof]` section of the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AofConfig {
    /// Path to the AOF file
    #[serde(rename = "filename")]
    pub path: PathBuf,
    /// Sync policy
    #[serde(rename = "fsync")]
    pub sync_policy: SyncPolicy,
    /// Whether to enable AOF
    pub enabled: bool,
}

impl Default for AofConfig {
    fn default() -> Self {
        AofConfig {
            path: PathBuf::from("appendonly.aof"),
            sync_policy: SyncPolicy::default(),
            enabled: false,
        }
    }
}

pub(crate) enum AofMessage {
    Record { db_index: usize, cmd_line: Vec<Bytes> },
    Close,
}

/// Handle on the append-only file
///
/// Records from all databases go through one bounded queue, so the file
/// holds them in the order they were enqueued.
pub struct AofHandler {
    path: PathBuf,
    tx: SyncSender<AofMessage>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl AofHandler {
    /// Open the file and start the writer thread
    pub fn open(config: &AofConfig) -> io::Result<Self> {
        let writer = AofWriter::new(&config.path, config.sync_policy)?;
        let (tx, rx) = mpsc::sync_channel(AOF_QUEUE_SIZE);

        let handle = thread::Builder::new()
            .name("aof-writer".to_string())
            .spawn(move || writer.run(rx))?;

        info!("AOF enabled: {:?} (fsync {:?})", config.path, config.sync_policy);

        Ok(AofHandler {
            path: config.path.clone(),
            tx,
            writer: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enqueue a command for `db_index`
    ///
    /// Blocks while the queue is full. Records sent after [`close`](Self::close)
    /// are dropped.
    pub fn add_aof(&self, db_index: usize, cmd_line: Vec<Bytes>) {
        if self.tx.send(AofMessage::Record { db_index, cmd_line }).is_err() {
            warn!("AOF writer is stopped, dropping record for db {}", db_index);
        }
    }

    /// Replay the file through `exec`
    ///
    /// Must run before any sink is handed out, otherwise replayed commands
    /// would be appended again.
    pub fn load_aof<F>(&self, exec: F) -> ReplayStats
    where
        F: FnMut(&Connection, &[Bytes]) -> Reply,
    {
        replay_file(&self.path, exec)
    }

    /// Sink bound to one database
    pub fn sink(self: &Arc<Self>, db_index: usize) -> AofSink {
        AofSink {
            db_index,
            handler: Arc::clone(self),
        }
    }

    /// Flush queued records and stop the writer thread
    pub fn close(&self) {
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(handle) = handle {
            let _ = self.tx.send(AofMessage::Close);
            if handle.join().is_err() {
                error!("AOF writer thread panicked");
            }
        }
    }
}

impl Drop for AofHandler {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-database append handle
#[derive(Clone)]
pub struct AofSink {
    db_index: usize,
    handler: Arc<AofHandler>,
}

impl AofSink {
    pub fn db_index(&self) -> usize {
        self.db_index
    }

    pub fn add(&self, cmd_line: Vec<Bytes>) {
        self.handler.add_aof(self.db_index, cmd_line);
    }
}
