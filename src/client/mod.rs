//! Pipelined peer client
//!
//! One TCP connection to another node, shared by many concurrent callers.
//! Requests are written back to back without waiting for replies; replies
//! come back in the same order and are paired with requests FIFO.

mod pipeline;

use crate::protocol::Reply;
use bytes::Bytes;
use pipeline::{spawn_reader, Shared, Writer};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Peer client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("client closed")]
    Closed,

    #[error("connection lost")]
    ConnectionLost,

    #[error("server time out")]
    Timeout,

    #[error("empty command")]
    EmptyCommand,
}

/// Peer client tuning
#[derive(Debug, Clone)]
pub struct PeerClientConfig {
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: usize,
    /// Capacity of the pending queue
    pub queue_size: usize,
}

impl Default for PeerClientConfig {
    fn default() -> Self {
        PeerClientConfig {
            request_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(10),
            max_reconnect_attempts: 3,
            queue_size: 256,
        }
    }
}

pub(crate) struct Request {
    id: u64,
    args: Vec<Bytes>,
    heartbeat: bool,
    done: oneshot::Sender<Result<Reply, ClientError>>,
}

impl Request {
    fn complete(self, result: Result<Reply, ClientError>) {
        if self.heartbeat {
            if let Err(e) = &result {
                debug!("Heartbeat {} failed: {}", self.id, e);
            }
        }
        // the caller may have timed out already
        let _ = self.done.send(result);
    }
}

/// Pipelined client for one peer node
pub struct PeerClient {
    addr: String,
    config: PeerClientConfig,
    pending: Mutex<Option<mpsc::Sender<Request>>>,
    shared: Arc<Shared>,
    next_id: Arc<AtomicU64>,
    closed: AtomicBool,
    token: CancellationToken,
    heartbeat_token: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl PeerClient {
    /// Dial `addr` and start the writer, reader and heartbeat tasks
    pub async fn connect(addr: impl Into<String>, config: PeerClientConfig) -> Result<Self, ClientError> {
        let addr = addr.into();
        let stream = TcpStream::connect(addr.as_str()).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared::new(addr.clone()));
        let token = CancellationToken::new();
        let reader_token = token.child_token();
        spawn_reader(Arc::clone(&shared), read_half, 0, reader_token.clone());

        let (tx, rx) = mpsc::channel(config.queue_size);
        let writer = Writer {
            shared: Arc::clone(&shared),
            write_half: Some(write_half),
            max_reconnect_attempts: config.max_reconnect_attempts,
            token: token.clone(),
            reader_token,
        };
        let writer = tokio::spawn(writer.run(rx));

        let next_id = Arc::new(AtomicU64::new(1));
        let heartbeat_token = token.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            addr.clone(),
            tx.clone(),
            Arc::clone(&next_id),
            config.clone(),
            heartbeat_token.clone(),
        ));

        info!("Connected to peer {}", addr);

        Ok(PeerClient {
            addr,
            config,
            pending: Mutex::new(Some(tx)),
            shared,
            next_id,
            closed: AtomicBool::new(false),
            token,
            heartbeat_token,
            writer: Mutex::new(Some(writer)),
            heartbeat: Mutex::new(Some(heartbeat)),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True unless the last connection failed and has not been replaced yet
    pub fn is_connected(&self) -> bool {
        self.shared.is_healthy()
    }

    /// Reconnect dials made since connecting, failed ones included
    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnect_dials()
    }

    /// Send a command and wait for its reply, as a reply
    pub async fn send(&self, args: Vec<Bytes>) -> Reply {
        match self.request(args).await {
            Ok(reply) => reply,
            Err(ClientError::Timeout) => Reply::error("ERR server time out"),
            Err(ClientError::Closed) => Reply::error("ERR client closed"),
            Err(e) => Reply::error(format!("ERR request failed: {}", e)),
        }
    }

    /// Send a command and wait for its reply
    ///
    /// Enqueueing and waiting share one `request_timeout` deadline.
    pub async fn request(&self, args: Vec<Bytes>) -> Result<Reply, ClientError> {
        let tx = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ClientError::Closed)?;

        let (done, rx) = oneshot::channel();
        let request = Request {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            args,
            heartbeat: false,
            done,
        };

        let exchange = async move {
            tx.send(request).await.map_err(|_| ClientError::Closed)?;
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(ClientError::ConnectionLost),
            }
        };

        match time::timeout(self.config.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Stop heartbeats, drain pending requests and shut the connection down
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.heartbeat_token.cancel();
        let heartbeat = self.heartbeat.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.await;
        }

        // dropping the last sender lets the writer drain and exit
        drop(self.pending.lock().unwrap_or_else(|e| e.into_inner()).take());
        let writer = self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        self.token.cancel();
        self.shared.fail_waiting(|| ClientError::Closed);
        info!("Closed connection to peer {}", self.addr);
    }
}

impl Drop for PeerClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn heartbeat_loop(
    addr: String,
    tx: mpsc::Sender<Request>,
    next_id: Arc<AtomicU64>,
    config: PeerClientConfig,
    token: CancellationToken,
) {
    let interval = config.heartbeat_interval;
    let mut ticker = time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let (done, rx) = oneshot::channel();
        let request = Request {
            id: next_id.fetch_add(1, Ordering::Relaxed),
            args: vec![Bytes::from_static(b"PING")],
            heartbeat: true,
            done,
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = tx.send(request) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        // the reply only keeps the connection warm
        tokio::select! {
            _ = token.cancelled() => break,
            result = time::timeout(config.request_timeout, rx) => match result {
                Ok(Ok(Ok(reply))) => debug!("Heartbeat to {}: {}", addr, reply),
                Ok(Ok(Err(e))) => debug!("Heartbeat to {} failed: {}", addr, e),
                Ok(Err(_)) => debug!("Heartbeat to {} dropped", addr),
                Err(_) => debug!("Heartbeat to {} timed out", addr),
            },
        }
    }
}
