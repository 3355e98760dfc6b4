//! AOF replay
//!
//! Feeds the AOF file back through the RESP decoder and hands every command
//! to an executor, the same way a client connection would.

use crate::connection::Connection;
use crate::protocol::{PayloadReader, Reply, RespError};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{error, info, warn};

/// Outcome of a replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Commands executed without error
    pub applied: usize,
    /// Malformed records and commands that returned an error
    pub skipped: usize,
}

/// Replay the file at `path`; a missing file replays nothing
pub fn replay_file<F>(path: &Path, exec: F) -> ReplayStats
where
    F: FnMut(&Connection, &[Bytes]) -> Reply,
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("No AOF loaded from {:?}: {}", path, e);
            return ReplayStats::default();
        }
    };

    info!("Loading AOF from {:?}", path);
    replay_entries(BufReader::new(file), exec)
}

/// Replay every command decoded from `reader`
///
/// All commands share one detached connection, so `SELECT` records switch
/// the database for the commands that follow.
pub fn replay_entries<R, F>(reader: R, mut exec: F) -> ReplayStats
where
    R: Read,
    F: FnMut(&Connection, &[Bytes]) -> Reply,
{
    let conn = Connection::detached();
    let mut stats = ReplayStats::default();

    for payload in PayloadReader::new(reader) {
        let reply = match payload {
            Ok(reply) => reply,
            Err(RespError::Io(msg)) => {
                warn!("AOF replay stopped early: {}", msg);
                break;
            }
            Err(e) => {
                error!("AOF parse error: {}", e);
                stats.skipped += 1;
                continue;
            }
        };

        let cmd_line = match reply.into_cmd_line() {
            Some(cmd_line) if !cmd_line.is_empty() => cmd_line,
            _ => {
                error!("AOF record is not a multi bulk command, skipping");
                stats.skipped += 1;
                continue;
            }
        };

        let ret = exec(&conn, &cmd_line);
        if ret.is_error() {
            error!("AOF exec error: {}", ret);
            stats.skipped += 1;
        } else {
            stats.applied += 1;
        }
    }

    if stats.skipped > 0 {
        warn!("AOF replay completed with {} skipped records. {} commands applied.", stats.skipped, stats.applied);
    } else {
        info!("AOF replayed successfully: {} commands", stats.applied);
    }

    stats
}
