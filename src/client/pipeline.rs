//! Writer and reader halves of a pipelined peer connection
//!
//! Requests are written in queue order and parked in the waiting queue; the
//! reader pairs each decoded reply with the oldest waiting request. Every
//! reconnect starts a new generation, and a reader only touches the waiting
//! queue while its generation is current.

use super::{ClientError, Request};
use crate::protocol::{parse_stream, Reply, RespEncoder, RespError};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct WaitingState {
    generation: u64,
    broken: bool,
    queue: VecDeque<Request>,
}

/// State shared by the writer and the current reader
pub(super) struct Shared {
    addr: String,
    state: Mutex<WaitingState>,
    /// Reconnect dials, successful or not
    dials: AtomicU64,
}

impl Shared {
    pub(super) fn new(addr: String) -> Self {
        Shared {
            addr,
            state: Mutex::new(WaitingState {
                generation: 0,
                broken: false,
                queue: VecDeque::new(),
            }),
            dials: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WaitingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_waiting(&self, request: Request) {
        self.lock().queue.push_back(request);
    }

    /// Take a request back out of the waiting queue after a failed write
    fn take_waiting(&self, id: u64) -> Option<Request> {
        let mut state = self.lock();
        let position = state.queue.iter().position(|r| r.id == id)?;
        state.queue.remove(position)
    }

    fn is_broken(&self) -> bool {
        self.lock().broken
    }

    fn mark_broken(&self) {
        self.lock().broken = true;
    }

    /// Start a new generation, failing whatever waited on the old connection
    fn next_generation(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.broken = false;
        fail_all(&mut state.queue, || ClientError::ConnectionLost);
        state.generation
    }

    /// Complete the oldest waiting request; false if `generation` is stale
    fn finish(&self, generation: u64, reply: Reply) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        match state.queue.pop_front() {
            Some(request) => request.complete(Ok(reply)),
            None => warn!("Unexpected reply from {}: {}", self.addr, reply),
        }
        true
    }

    fn connection_lost(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.broken = true;
            fail_all(&mut state.queue, || ClientError::ConnectionLost);
        }
    }

    pub(super) fn fail_waiting(&self, err: fn() -> ClientError) {
        fail_all(&mut self.lock().queue, err);
    }

    pub(super) fn reconnect_dials(&self) -> u64 {
        self.dials.load(Ordering::Relaxed)
    }

    pub(super) fn is_healthy(&self) -> bool {
        !self.is_broken()
    }
}

fn fail_all(queue: &mut VecDeque<Request>, err: impl Fn() -> ClientError) {
    for request in queue.drain(..) {
        request.complete(Err(err()));
    }
}

/// Owns the write half; the single writer of the socket
pub(super) struct Writer {
    pub(super) shared: Arc<Shared>,
    pub(super) write_half: Option<OwnedWriteHalf>,
    pub(super) max_reconnect_attempts: usize,
    /// Parent of every reader token
    pub(super) token: CancellationToken,
    pub(super) reader_token: CancellationToken,
}

impl Writer {
    pub(super) async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(request) = rx.recv().await {
            self.do_request(request).await;
        }

        // pending queue closed and drained
        if let Some(mut write_half) = self.write_half.take() {
            let _ = write_half.shutdown().await;
        }
        debug!("Writer for {} stopped", self.shared.addr);
    }

    async fn do_request(&mut self, mut request: Request) {
        if request.args.is_empty() {
            request.complete(Err(ClientError::EmptyCommand));
            return;
        }

        let frame = RespEncoder::command(&request.args);
        let id = request.id;
        // dials made for this request, at most max_reconnect_attempts
        let mut attempts = 0;
        let mut last_error = None;

        loop {
            if self.write_half.is_none() || self.shared.is_broken() {
                if attempts >= self.max_reconnect_attempts {
                    request.complete(Err(last_error.unwrap_or(ClientError::ConnectionLost)));
                    return;
                }
                attempts += 1;
                if let Err(e) = self.reconnect().await {
                    warn!(
                        "Reconnect to {} failed ({}/{}): {}",
                        self.shared.addr, attempts, self.max_reconnect_attempts, e
                    );
                    last_error = Some(e);
                    continue;
                }
            }

            // queued before the write so the reader always finds it
            self.shared.push_waiting(request);

            let result = match self.write_half.as_mut() {
                Some(write_half) => write_half.write_all(&frame).await,
                None => Err(std::io::ErrorKind::NotConnected.into()),
            };

            let e = match result {
                Ok(()) => return,
                Err(e) => e,
            };

            warn!("Write to {} failed: {}", self.shared.addr, e);
            self.shared.mark_broken();
            request = match self.shared.take_waiting(id) {
                Some(request) => request,
                None => return,
            };
            last_error = Some(ClientError::Io(e));
        }
    }

    async fn reconnect(&mut self) -> Result<(), ClientError> {
        self.shared.dials.fetch_add(1, Ordering::Relaxed);
        if let Some(mut old) = self.write_half.take() {
            let _ = old.shutdown().await;
        }
        self.reader_token.cancel();

        let stream = TcpStream::connect(self.shared.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let generation = self.shared.next_generation();
        self.write_half = Some(write_half);
        self.reader_token = self.token.child_token();
        spawn_reader(
            Arc::clone(&self.shared),
            read_half,
            generation,
            self.reader_token.clone(),
        );

        info!("Reconnected to {} (generation {})", self.shared.addr, generation);
        Ok(())
    }
}

pub(super) fn spawn_reader(
    shared: Arc<Shared>,
    read_half: OwnedReadHalf,
    generation: u64,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let frames = parse_stream(read_half);
        tokio::pin!(frames);

        loop {
            let payload = tokio::select! {
                _ = token.cancelled() => return,
                payload = frames.next() => payload,
            };

            let accepted = match payload {
                Some(Ok(reply)) => shared.finish(generation, reply),
                Some(Err(RespError::Protocol(msg))) => shared.finish(generation, Reply::Error(msg)),
                Some(Err(RespError::Io(msg))) => {
                    debug!("Connection to {} failed: {}", shared.addr, msg);
                    shared.connection_lost(generation);
                    return;
                }
                None => {
                    debug!("Connection to {} closed by peer", shared.addr);
                    shared.connection_lost(generation);
                    return;
                }
            };

            if !accepted {
                return;
            }
        }
    });
}
