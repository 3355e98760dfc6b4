//! AOF writer
//!
//! Owns the append-only file on the dedicated writer thread. Records arrive
//! in queue order and are written as RESP multi bulk frames, with a `SELECT`
//! frame in front whenever the target database changes.

use super::{AofMessage, SyncPolicy};
use crate::connection::select_cmd_line;
use crate::protocol::RespEncoder;
use bytes::{Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// AOF writer
pub struct AofWriter {
    file: File,
    sync_policy: SyncPolicy,
    last_sync: Instant,
    /// Database the file is currently positioned on; unknown until the first record
    current_db: Option<usize>,
    /// File length after the last complete record
    len: u64,
}

impl AofWriter {
    /// Open (or create) the file in append mode
    pub fn new<P: AsRef<Path>>(path: P, sync_policy: SyncPolicy) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(AofWriter {
            file,
            sync_policy,
            last_sync: Instant::now(),
            current_db: None,
            len,
        })
    }

    /// Append one command for `db_index`
    ///
    /// The `SELECT` frame and the command go out in one write. If it fails
    /// the file is cut back to the last complete record and the current
    /// database is left unchanged.
    pub fn append(&mut self, db_index: usize, cmd_line: &[Bytes]) -> io::Result<()> {
        let mut frame = BytesMut::new();
        let switch_db = self.current_db != Some(db_index);
        if switch_db {
            frame.extend_from_slice(&RespEncoder::command(&select_cmd_line(db_index)));
        }
        frame.extend_from_slice(&RespEncoder::command(cmd_line));

        if let Err(e) = self.file.write_all(&frame) {
            self.discard_partial();
            return Err(e);
        }
        self.len += frame.len() as u64;
        if switch_db {
            self.current_db = Some(db_index);
        }

        self.apply_sync_policy()
    }

    /// Drop whatever a failed write left after the last complete record
    fn discard_partial(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            // the tail may hold a torn frame; force a SELECT before the next record
            warn!("Failed to truncate AOF to {} bytes: {}", self.len, e);
            self.current_db = None;
        }
    }

    fn apply_sync_policy(&mut self) -> io::Result<()> {
        match self.sync_policy {
            SyncPolicy::Always => self.file.sync_data(),
            SyncPolicy::EverySecond => {
                if self.last_sync.elapsed() >= Duration::from_secs(1) {
                    self.sync()?;
                }
                Ok(())
            }
            SyncPolicy::No => Ok(()),
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Writer thread body: drain the queue until closed
    pub(super) fn run(mut self, rx: Receiver<AofMessage>) {
        let mut written: u64 = 0;
        for message in rx {
            match message {
                AofMessage::Record { db_index, cmd_line } => {
                    match self.append(db_index, &cmd_line) {
                        Ok(()) => written += 1,
                        Err(e) => warn!("Failed to write to AOF (db {}): {}. Record dropped.", db_index, e),
                    }
                }
                AofMessage::Close => {
                    debug!("AOF writer received close");
                    break;
                }
            }
        }

        if let Err(e) = self.sync() {
            warn!("Failed to sync AOF on close: {}", e);
        }
        info!("AOF writer stopped after {} records", written);
    }
}
