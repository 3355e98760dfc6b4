//! Cluster command routing table
//!
//! Decides, per command name, where a command runs in cluster mode. The
//! table is built once and never changes.

use std::collections::HashMap;

/// Prefix of a broadcast command sent to a peer; the peer runs the rest locally
pub const LOCAL_EXEC: &str = "localexec";

/// How a command is executed across the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Runs on this node only
    Local,
    /// Unwraps `LOCALEXEC` and runs the inner command on this node only
    LocalExec,
    /// Relayed to the owner of the first key
    Relay,
    /// Every key must live on one node, then relayed there
    SameSlot,
    /// Keys grouped by owner, one relay per owner, integer replies summed
    FanOutCount,
    /// Sent to every node, OK only if all succeed
    Broadcast,
    /// Sent to every node, multi bulk replies concatenated
    BroadcastMerge,
}

/// Routes keyed by lowercase command name
pub struct RouteTable {
    routes: HashMap<&'static str, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        let mut routes = HashMap::new();

        routes.insert("ping", Route::Local);
        routes.insert("select", Route::Local);
        routes.insert(LOCAL_EXEC, Route::LocalExec);

        for name in ["get", "set", "setnx", "getset", "strlen", "type"] {
            routes.insert(name, Route::Relay);
        }

        routes.insert("rename", Route::SameSlot);
        routes.insert("renamenx", Route::SameSlot);

        routes.insert("del", Route::FanOutCount);
        routes.insert("exists", Route::FanOutCount);

        routes.insert("flushdb", Route::Broadcast);
        routes.insert("keys", Route::BroadcastMerge);

        RouteTable { routes }
    }

    pub fn get(&self, name: &str) -> Option<Route> {
        self.routes.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
