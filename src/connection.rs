//! Per-connection context
//!
//! Tracks which logical database a client has selected. Detached connections
//! carry the same state for AOF replay and internal callers.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct Connection {
    id: u64,
    remote_addr: Option<SocketAddr>,
    db_index: AtomicUsize,
}

impl Connection {
    /// Context for an accepted client socket
    pub fn new(remote_addr: SocketAddr) -> Self {
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr: Some(remote_addr),
            db_index: AtomicUsize::new(0),
        }
    }

    /// Context not bound to any socket
    pub fn detached() -> Self {
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr: None,
            db_index: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn db_index(&self) -> usize {
        self.db_index.load(Ordering::Acquire)
    }

    pub fn select_db(&self, index: usize) {
        self.db_index.store(index, Ordering::Release);
    }
}

/// `SELECT <index>` as a command line
pub fn select_cmd_line(db_index: usize) -> Vec<Bytes> {
    vec![Bytes::from_static(b"SELECT"), Bytes::from(db_index.to_string())]
}
