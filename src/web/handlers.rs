//! HTTP handlers for the status API

use axum::{extract::State, http::StatusCode, response::Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use sysinfo::System;
use tracing::debug;

use crate::connection::Connection;
use crate::database::{Database, DbStats};
use crate::protocol::Reply;

const MB: f64 = 1024.0 * 1024.0;

/// Request body for command execution
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// The command as a string, e.g., "SET key value"
    pub command: String,
}

/// Response for command execution
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    /// The reply, or the error message
    pub result: String,
}

/// System statistics response
#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub total_memory_mb: f64,
    /// Used by the whole system
    pub used_memory_mb: f64,
    pub free_memory_mb: f64,
    /// Resident memory of this process
    pub process_memory_mb: f64,
    /// CPU usage percentage (0-100)
    pub cpu_usage: f64,
    /// Estimated size of the local key space
    pub db_memory_mb: f64,
    pub total_keys: usize,
    pub databases: Vec<DbStats>,
}

/// Execute one command through the database
///
/// Runs on a fresh detached connection, so it always starts in db 0 and a
/// `SELECT` only lasts for this request.
pub async fn execute_command<D: Database>(
    State(db): State<Arc<D>>,
    Json(req): Json<CommandRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    debug!("Executing command: {}", req.command);

    let cmd_line: Vec<Bytes> = req
        .command
        .split_whitespace()
        .map(|s| Bytes::copy_from_slice(s.as_bytes()))
        .collect();

    if cmd_line.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(CommandResponse {
                success: false,
                result: "Empty command".to_string(),
            }),
        );
    }

    let conn = Connection::detached();
    let reply = db.exec(&conn, &cmd_line).await;
    db.after_client_close(&conn);

    (
        StatusCode::OK,
        Json(CommandResponse {
            success: !reply.is_error(),
            result: format_reply(&reply),
        }),
    )
}

/// Render a reply the way redis-cli prints it
fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Status(s) => s.clone(),
        Reply::Error(e) => format!("Error: {}", e),
        Reply::Integer(i) => i.to_string(),
        Reply::Bulk(Some(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        Reply::Bulk(None) => "(nil)".to_string(),
        Reply::MultiBulk(items) if items.is_empty() => "(empty array)".to_string(),
        Reply::MultiBulk(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Some(bytes) => format!("{}) {}", i + 1, String::from_utf8_lossy(bytes)),
                None => format!("{}) (nil)", i + 1),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Reply::NoReply => String::new(),
    }
}

/// Host and process resources plus local key counts
pub async fn stats_handler<D: Database>(State(db): State<Arc<D>>) -> (StatusCode, Json<SystemStats>) {
    let mut sys = System::new_all();
    sys.refresh_all();

    let total = sys.total_memory();
    let available = sys.available_memory();
    let process_memory = sysinfo::get_current_pid()
        .ok()
        .and_then(|pid| sys.process(pid))
        .map(|process| process.memory())
        .unwrap_or(0);

    let databases = db.stats();
    let total_keys = databases.iter().map(|s| s.keys).sum();
    let db_memory: usize = databases.iter().map(|s| s.memory_bytes).sum();

    let stats = SystemStats {
        total_memory_mb: total as f64 / MB,
        used_memory_mb: total.saturating_sub(available) as f64 / MB,
        free_memory_mb: available as f64 / MB,
        process_memory_mb: process_memory as f64 / MB,
        cpu_usage: sys.global_cpu_usage() as f64,
        db_memory_mb: db_memory as f64 / MB,
        total_keys,
        databases,
    };

    (StatusCode::OK, Json(stats))
}

/// Cluster layout, or the standalone marker
pub async fn cluster_handler<D: Database>(State(db): State<Arc<D>>) -> (StatusCode, Json<Value>) {
    let body = match db.topology() {
        Some(topology) => json!({
            "mode": "cluster",
            "topology": topology,
        }),
        None => json!({ "mode": "standalone" }),
    };
    (StatusCode::OK, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StandaloneDatabase;

    fn request(command: &str) -> Json<CommandRequest> {
        Json(CommandRequest {
            command: command.to_string(),
        })
    }

    #[tokio::test]
    async fn test_execute_command() {
        let db = Arc::new(StandaloneDatabase::new(2));

        let (status, Json(resp)) = execute_command(State(Arc::clone(&db)), request("SET greeting hello")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(resp.success);
        assert_eq!(resp.result, "OK");

        let (_, Json(resp)) = execute_command(State(Arc::clone(&db)), request("  GET   greeting ")).await;
        assert_eq!(resp.result, "hello");

        let (_, Json(resp)) = execute_command(State(Arc::clone(&db)), request("NOPE")).await;
        assert!(!resp.success);
        assert_eq!(resp.result, "Error: ERR unknown command 'nope'");
    }

    #[tokio::test]
    async fn test_empty_command() {
        let db = Arc::new(StandaloneDatabase::new(1));
        let (status, Json(resp)) = execute_command(State(db), request("   ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!resp.success);
    }

    #[test]
    fn test_format_reply() {
        assert_eq!(format_reply(&Reply::integer(3)), "3");
        assert_eq!(format_reply(&Reply::null_bulk()), "(nil)");
        assert_eq!(format_reply(&Reply::empty_multi_bulk()), "(empty array)");
        assert_eq!(
            format_reply(&Reply::MultiBulk(vec![Some(Bytes::from("a")), None])),
            "1) a\n2) (nil)"
        );
    }

    #[tokio::test]
    async fn test_stats_and_cluster() {
        let db = Arc::new(StandaloneDatabase::new(3));
        let conn = Connection::detached();
        db.exec_local(&conn, &[Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")]);

        let (_, Json(stats)) = stats_handler(State(Arc::clone(&db))).await;
        assert_eq!(stats.databases.len(), 3);
        assert_eq!(stats.total_keys, 1);

        let (_, Json(body)) = cluster_handler(State(db)).await;
        assert_eq!(body, json!({ "mode": "standalone" }));
    }
}
