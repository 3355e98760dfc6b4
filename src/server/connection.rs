//! Client connection handling
//!
//! Decodes RESP payloads from one client, runs each command line through the
//! database and writes the replies back in order.

use crate::connection::Connection;
use crate::database::Database;
use crate::protocol::{parse_stream, Reply, RespEncoder, RespError};
use base64::{engine::general_purpose, Engine as _};
use bytes::BytesMut;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Serves one client until it disconnects or the server shuts down
pub struct ClientHandler<D> {
    db: Arc<D>,
    conn: Connection,
    token: CancellationToken,
}

impl<D: Database> ClientHandler<D> {
    pub fn new(db: Arc<D>, conn: Connection, token: CancellationToken) -> Self {
        ClientHandler { db, conn, token }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run the request loop over `stream`
    pub async fn handle<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let payloads = parse_stream(reader);
        tokio::pin!(payloads);

        let mut write_buffer = BytesMut::with_capacity(4096);

        loop {
            let payload = tokio::select! {
                _ = self.token.cancelled() => break,
                payload = payloads.next() => payload,
            };

            let reply = match payload {
                None => break,
                Some(Err(RespError::Io(e))) => {
                    debug!("Read failed on connection {}: {}", self.conn.id(), e);
                    break;
                }
                Some(Err(e)) => Reply::error(e.to_string()),
                Some(Ok(Reply::MultiBulk(args))) => {
                    let cmd_line: Vec<_> = args.into_iter().map(Option::unwrap_or_default).collect();
                    self.db.exec(&self.conn, &cmd_line).await
                }
                Some(Ok(other)) => {
                    let raw = RespEncoder::encode(&other);
                    error!(
                        "Require multi bulk command, got {}. Frame (B64): {}",
                        other,
                        general_purpose::STANDARD.encode(&raw)
                    );
                    continue;
                }
            };

            if reply == Reply::NoReply {
                continue;
            }

            write_buffer.clear();
            RespEncoder::encode_to(&mut write_buffer, &reply);
            if let Err(e) = writer.write_all(&write_buffer).await {
                debug!("Write failed on connection {}: {}", self.conn.id(), e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        self.db.after_client_close(&self.conn);

        match self.conn.remote_addr() {
            Some(addr) => info!("Connection closed: {}", addr),
            None => info!("Connection {} closed", self.conn.id()),
        }
    }
}
