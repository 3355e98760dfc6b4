//! Local command execution
//!
//! [`StandaloneDatabase`] owns the numbered databases and the AOF. It is the
//! executor the server uses directly in standalone mode, and the local half
//! of a [`ClusterDatabase`](crate::cluster::ClusterDatabase).

mod admin;
mod db;
mod keys;
mod registry;
mod string;

pub use db::Db;
pub use registry::{arity_ok, Command, CommandRegistry};

use crate::aof::{AofConfig, AofHandler};
use crate::connection::Connection;
use crate::protocol::Reply;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info};

/// Default number of logical databases
pub const DEFAULT_DATABASES: usize = 16;

/// Command executor seen by the server and the status API
pub trait Database: Send + Sync + 'static {
    /// Execute one command line for `conn`
    ///
    /// Never panics; internal faults come back as `ERR unknown`.
    fn exec(&self, conn: &Connection, cmd_line: &[Bytes]) -> impl Future<Output = Reply> + Send;

    /// Called once a client connection is gone
    fn after_client_close(&self, conn: &Connection);

    /// Release resources; the database is not used afterwards
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Cluster layout, `None` in standalone mode
    fn topology(&self) -> Option<Topology> {
        None
    }

    /// Key counts of the local databases
    fn stats(&self) -> Vec<DbStats>;
}

/// Size of one local database
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DbStats {
    pub index: usize,
    pub keys: usize,
    pub memory_bytes: usize,
}

/// Cluster layout as seen from one node
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    /// This node's address
    pub self_node: String,
    /// Every node, self included, in configuration order
    pub nodes: Vec<String>,
    /// Nodes in ring order
    pub ring: Vec<String>,
    /// Idle pooled connections per peer
    pub idle_connections: BTreeMap<String, usize>,
}

/// Multi-database local executor
pub struct StandaloneDatabase {
    dbs: Vec<Db>,
    aof: Option<Arc<AofHandler>>,
}

impl StandaloneDatabase {
    /// In-memory executor without persistence
    pub fn new(databases: usize) -> Self {
        let databases = if databases == 0 { DEFAULT_DATABASES } else { databases };
        let registry = Arc::new(CommandRegistry::new());
        let dbs = (0..databases)
            .map(|index| Db::new(index, Arc::clone(&registry)))
            .collect();

        StandaloneDatabase { dbs, aof: None }
    }

    /// Executor with the AOF replayed and attached when enabled
    pub fn open(databases: usize, aof_config: &AofConfig) -> anyhow::Result<Self> {
        let mut database = Self::new(databases);
        if !aof_config.enabled {
            return Ok(database);
        }

        let handler = Arc::new(AofHandler::open(aof_config)?);

        // Sinks are attached only after replay so replayed commands are not appended again
        let stats = handler.load_aof(|conn, cmd_line| database.exec_local(conn, cmd_line));
        info!(
            "AOF loaded: {} commands applied, {} skipped",
            stats.applied, stats.skipped
        );

        for db in database.dbs.iter_mut() {
            let sink = handler.sink(db.index());
            db.attach_aof(sink);
        }
        database.aof = Some(handler);

        Ok(database)
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    pub fn db(&self, index: usize) -> Option<&Db> {
        self.dbs.get(index)
    }

    /// Synchronous execution used by the server, replay and the cluster router
    pub fn exec_local(&self, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(conn, cmd_line))) {
            Ok(reply) => reply,
            Err(_) => {
                error!("Command panicked, replying ERR unknown");
                Reply::unknown_error()
            }
        }
    }

    fn dispatch(&self, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        let Some(first) = cmd_line.first() else {
            return Reply::error("ERR empty command");
        };

        if first.eq_ignore_ascii_case(b"select") {
            if cmd_line.len() != 2 {
                return Reply::arg_num_error("select");
            }
            return self.select(conn, &cmd_line[1]);
        }

        match self.dbs.get(conn.db_index()) {
            Some(db) => db.exec(cmd_line),
            None => Reply::error("ERR DB index is out of range"),
        }
    }

    fn select(&self, conn: &Connection, arg: &[u8]) -> Reply {
        let index = match std::str::from_utf8(arg).ok().and_then(|s| s.parse::<i64>().ok()) {
            Some(index) => index,
            None => return Reply::error("ERR invalid DB index"),
        };
        if index < 0 || index as usize >= self.dbs.len() {
            return Reply::error("ERR DB index is out of range");
        }
        conn.select_db(index as usize);
        Reply::ok()
    }

    /// Flush and stop the AOF writer
    pub fn close_local(&self) {
        if let Some(aof) = &self.aof {
            aof.close();
        }
    }

    pub fn local_stats(&self) -> Vec<DbStats> {
        self.dbs
            .iter()
            .map(|db| DbStats {
                index: db.index(),
                keys: db.data().len(),
                memory_bytes: db.data().memory_usage(),
            })
            .collect()
    }
}

impl Database for StandaloneDatabase {
    async fn exec(&self, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        self.exec_local(conn, cmd_line)
    }

    fn after_client_close(&self, _conn: &Connection) {}

    async fn close(&self) {
        self.close_local();
    }

    fn stats(&self) -> Vec<DbStats> {
        self.local_stats()
    }
}
