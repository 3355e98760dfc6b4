//! Cluster mode
//!
//! Every node holds part of the key space. Keys are placed with a consistent
//! hash ring over node addresses; a command touching keys owned elsewhere is
//! relayed to the owner over a pooled, pipelined [`PeerClient`]. Clients can
//! talk to any node.
//!
//! [`PeerClient`]: crate::client::PeerClient

mod commands;
mod hashring;
mod pool;
mod router;

pub use hashring::{default_hash, HashFn, HashRing};
pub use pool::{ConnectionFactory, PeerConnectionFactory, PeerPool, PoolConfig, PoolError, PooledConnection};
pub use router::{Route, RouteTable, LOCAL_EXEC};

use crate::client::PeerClientConfig;
use crate::connection::{select_cmd_line, Connection};
use crate::database::{Database, DbStats, StandaloneDatabase, Topology};
use crate::protocol::Reply;
use bytes::Bytes;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

/// Cluster membership and peer link settings
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Address other nodes use to reach this one
    pub self_addr: String,
    pub peers: Vec<String>,
    pub pool: PoolConfig,
    pub client: PeerClientConfig,
}

/// Cluster node: routes commands between the local executor and peers
pub struct ClusterDatabase {
    self_node: String,
    /// Peers then self
    nodes: Vec<String>,
    ring: HashRing,
    pools: HashMap<String, PeerPool<PeerConnectionFactory>>,
    routes: RouteTable,
    local: StandaloneDatabase,
}

impl ClusterDatabase {
    /// Build the ring and one pool per peer; connections are dialed lazily
    pub fn new(config: ClusterConfig, local: StandaloneDatabase) -> Self {
        Self::with_hash(config, local, default_hash)
    }

    pub fn with_hash(config: ClusterConfig, local: StandaloneDatabase, hash_fn: HashFn) -> Self {
        let ClusterConfig {
            self_addr,
            peers,
            pool,
            client,
        } = config;

        let mut nodes: Vec<String> = Vec::with_capacity(peers.len() + 1);
        for peer in peers {
            if peer.is_empty() || peer == self_addr || nodes.contains(&peer) {
                continue;
            }
            nodes.push(peer);
        }

        let pools = nodes
            .iter()
            .map(|peer| {
                let factory = PeerConnectionFactory::new(peer.clone(), client.clone());
                (peer.clone(), PeerPool::new(factory, pool.clone()))
            })
            .collect();

        nodes.push(self_addr.clone());

        let mut ring = HashRing::with_hash(hash_fn);
        ring.add_nodes(&nodes);

        info!("Cluster node {} with {} peers", self_addr, nodes.len() - 1);

        ClusterDatabase {
            self_node: self_addr,
            nodes,
            ring,
            pools,
            routes: RouteTable::new(),
            local,
        }
    }

    pub fn self_node(&self) -> &str {
        &self.self_node
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn local(&self) -> &StandaloneDatabase {
        &self.local
    }

    /// Owner of `key`
    pub fn pick_node(&self, key: &[u8]) -> &str {
        // the ring always holds at least this node
        self.ring.pick_node(key).unwrap_or(self.self_node.as_str())
    }

    async fn route(&self, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        let Some(first) = cmd_line.first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();

        let Some(route) = self.routes.get(&name) else {
            return Reply::error(format!(
                "ERR unknown command '{}', or not supported in cluster mode",
                name
            ));
        };

        match route {
            Route::Local => self.local.exec_local(conn, cmd_line),
            Route::LocalExec => match cmd_line.get(1..) {
                Some(inner) if !inner.is_empty() => self.local.exec_local(conn, inner),
                _ => Reply::arg_num_error(LOCAL_EXEC),
            },
            Route::Relay => self.relay_by_key(&name, conn, cmd_line).await,
            Route::SameSlot => self.relay_same_slot(&name, conn, cmd_line).await,
            Route::FanOutCount => self.fan_out_count(&name, conn, cmd_line).await,
            Route::Broadcast => self.broadcast_all_ok(conn, cmd_line).await,
            Route::BroadcastMerge => self.broadcast_merge(&name, conn, cmd_line).await,
        }
    }

    /// Execute `args` on `node` within the caller's selected database
    pub async fn relay(&self, node: &str, conn: &Connection, args: Vec<Bytes>) -> Reply {
        if node == self.self_node {
            return self.local.exec_local(conn, &args);
        }

        let Some(pool) = self.pools.get(node) else {
            return Reply::error(format!("ERR no connection pool for node {}", node));
        };

        let client = match pool.borrow().await {
            Ok(client) => client,
            Err(e) => {
                warn!("Cannot reach {}: {}", node, e);
                return Reply::error(format!("ERR {}", e));
            }
        };

        let selected = client.send(select_cmd_line(conn.db_index())).await;
        if selected.is_error() {
            return selected;
        }
        client.send(args).await
    }

    /// Execute `args` on every node's own keyspace, self included
    ///
    /// Peers receive the command wrapped in `LOCALEXEC`, so it is not routed
    /// again on their side.
    pub async fn broadcast(&self, conn: &Connection, args: &[Bytes]) -> HashMap<String, Reply> {
        let replies = join_all(self.nodes.iter().map(|node| self.exec_on_node(node, conn, args))).await;

        self.nodes.iter().cloned().zip(replies).collect()
    }

    async fn exec_on_node(&self, node: &str, conn: &Connection, args: &[Bytes]) -> Reply {
        if node == self.self_node {
            return self.local.exec_local(conn, args);
        }
        let mut wrapped = Vec::with_capacity(args.len() + 1);
        wrapped.push(Bytes::from_static(LOCAL_EXEC.as_bytes()));
        wrapped.extend_from_slice(args);
        self.relay(node, conn, wrapped).await
    }

    /// Every node's reply in node order
    pub(crate) async fn broadcast_ordered(&self, conn: &Connection, args: &[Bytes]) -> Vec<Reply> {
        let mut replies = self.broadcast(conn, args).await;
        self.nodes
            .iter()
            .filter_map(|node| replies.remove(node))
            .collect()
    }
}

impl Database for ClusterDatabase {
    async fn exec(&self, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        match AssertUnwindSafe(self.route(conn, cmd_line)).catch_unwind().await {
            Ok(reply) => reply,
            Err(_) => {
                error!("Cluster command panicked, replying ERR unknown");
                Reply::unknown_error()
            }
        }
    }

    fn after_client_close(&self, conn: &Connection) {
        self.local.after_client_close(conn);
    }

    async fn close(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
        self.local.close_local();
    }

    fn topology(&self) -> Option<Topology> {
        Some(Topology {
            self_node: self.self_node.clone(),
            nodes: self.nodes.clone(),
            ring: self.ring.nodes_in_order(),
            idle_connections: self
                .pools
                .iter()
                .map(|(node, pool)| (node.clone(), pool.idle_count()))
                .collect(),
        })
    }

    fn stats(&self) -> Vec<DbStats> {
        self.local.local_stats()
    }
}
