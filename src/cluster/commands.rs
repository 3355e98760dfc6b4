//! Route handlers for cluster commands

use super::ClusterDatabase;
use crate::connection::Connection;
use crate::protocol::Reply;
use bytes::Bytes;

impl ClusterDatabase {
    /// Relay to the owner of `cmd_line[1]`
    pub(super) async fn relay_by_key(&self, name: &str, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        if cmd_line.len() < 2 {
            return Reply::arg_num_error(name);
        }
        let node = self.pick_node(&cmd_line[1]);
        self.relay(node, conn, cmd_line.to_vec()).await
    }

    /// Relay only when source and destination keys share an owner
    pub(super) async fn relay_same_slot(&self, name: &str, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        if cmd_line.len() != 3 {
            return Reply::arg_num_error(name);
        }

        let src_node = self.pick_node(&cmd_line[1]);
        let dest_node = self.pick_node(&cmd_line[2]);
        if src_node != dest_node {
            return Reply::error(format!("ERR {} must within one slot in cluster mode", name));
        }

        self.relay(src_node, conn, cmd_line.to_vec()).await
    }

    /// Group keys by owner, run one command per owner and sum the counts
    pub(super) async fn fan_out_count(&self, name: &str, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        if cmd_line.len() < 2 {
            return Reply::arg_num_error(name);
        }

        // owners in first-seen order
        let mut groups: Vec<(&str, Vec<Bytes>)> = Vec::new();
        for key in &cmd_line[1..] {
            let node = self.pick_node(key);
            match groups.iter_mut().find(|(owner, _)| *owner == node) {
                Some((_, keys)) => keys.push(key.clone()),
                None => groups.push((node, vec![cmd_line[0].clone(), key.clone()])),
            }
        }

        let mut total = 0;
        for (node, args) in groups {
            match self.relay(node, conn, args).await {
                Reply::Integer(n) => total += n,
                reply @ Reply::Error(_) => return reply,
                other => {
                    return Reply::error(format!("ERR unexpected reply from {}: {}", node, other));
                }
            }
        }
        Reply::integer(total)
    }

    /// Broadcast and reply OK only if no node failed
    pub(super) async fn broadcast_all_ok(&self, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        let replies = self.broadcast_ordered(conn, cmd_line).await;
        match replies.into_iter().find(Reply::is_error) {
            Some(Reply::Error(msg)) => Reply::error(format!("error occurs: {}", msg)),
            _ => Reply::ok(),
        }
    }

    /// Broadcast and concatenate every node's multi bulk reply
    pub(super) async fn broadcast_merge(&self, name: &str, conn: &Connection, cmd_line: &[Bytes]) -> Reply {
        if cmd_line.len() != 2 {
            return Reply::arg_num_error(name);
        }

        let mut merged = Vec::new();
        for reply in self.broadcast_ordered(conn, cmd_line).await {
            match reply {
                Reply::MultiBulk(items) => merged.extend(items),
                Reply::Error(msg) => return Reply::Error(msg),
                other => return Reply::error(format!("ERR unexpected reply: {}", other)),
            }
        }
        Reply::MultiBulk(merged)
    }
}
