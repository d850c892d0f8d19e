//! One connected peer and its transport
//!
//! A client is reached either through a WebSocket (a bounded channel into
//! the socket's writer task) or through long polling (a queue flushed into
//! the held `GET` response after a short linger).

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::timer::TimerGuard;

/// Idle limit for WebSocket clients
pub const SOCKET_IDLE_LIMIT: Duration = Duration::from_secs(11 * 60);

/// Idle limit for polling clients
pub const POLLING_IDLE_LIMIT: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Socket,
    Polling,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Socket => "socket",
            TransportMode::Polling => "polling",
        }
    }

    fn idle_limit(&self) -> Duration {
        match self {
            TransportMode::Socket => SOCKET_IDLE_LIMIT,
            TransportMode::Polling => POLLING_IDLE_LIMIT,
        }
    }
}

/// Flags a transport reads from the connect query string
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub compact: bool,
    pub batchable: bool,
    pub device: Option<String>,
    pub polling_linger: Duration,
    pub polling_queue_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            compact: false,
            batchable: false,
            device: None,
            polling_linger: Duration::from_millis(200),
            polling_queue_size: 30,
        }
    }
}

/// Outcome of attaching a long-poll request
#[derive(Debug)]
pub enum PollAttach {
    /// Messages were already queued; answer with this body now
    Ready(String),
    /// Hold the response until the receiver yields a body or is dropped
    Wait(oneshot::Receiver<String>),
}

#[derive(Debug)]
struct ClientState {
    mode: TransportMode,
    socket: Option<mpsc::Sender<String>>,
    poll_writer: Option<oneshot::Sender<String>>,
    queue: Vec<Value>,
    linger: Option<TimerGuard>,
    last_activity: Instant,
    not_found_cache: Option<String>,
    closed: bool,
}

impl ClientState {
    fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            socket: None,
            poll_writer: None,
            queue: Vec::new(),
            linger: None,
            last_activity: Instant::now(),
            not_found_cache: None,
            closed: false,
        }
    }

    /// Drop the linger timer, the held response, and anything queued
    fn release_transport(&mut self) {
        self.linger = None;
        self.poll_writer = None;
        self.socket = None;
        self.queue.clear();
    }
}

/// A locally connected peer
#[derive(Debug)]
pub struct Client {
    peer_id: String,
    options: ClientOptions,
    state: Mutex<ClientState>,
}

impl Client {
    /// A client speaking over a WebSocket whose writer drains `socket`
    pub fn socket(peer_id: impl Into<String>, options: ClientOptions, socket: mpsc::Sender<String>) -> Arc<Self> {
        let mut state = ClientState::new(TransportMode::Socket);
        state.socket = Some(socket);
        Arc::new(Self {
            peer_id: peer_id.into(),
            options,
            state: Mutex::new(state),
        })
    }

    /// A client reached by long polling, with no request held yet
    pub fn polling(peer_id: impl Into<String>, options: ClientOptions) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.into(),
            options,
            state: Mutex::new(ClientState::new(TransportMode::Polling)),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn compact(&self) -> bool {
        self.options.compact
    }

    pub fn batchable(&self) -> bool {
        self.options.batchable
    }

    pub fn device(&self) -> Option<&str> {
        self.options.device.as_deref()
    }

    pub fn mode(&self) -> TransportMode {
        self.state.lock().mode
    }

    pub fn is_polling(&self) -> bool {
        self.mode() == TransportMode::Polling
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // ─────────────────────────────────────────────────────────────
    // Transport Switching
    // ─────────────────────────────────────────────────────────────

    /// Move to a WebSocket, releasing any held poll and its queue
    pub fn switch_to_socket(&self, socket: mpsc::Sender<String>) {
        let mut state = self.state.lock();
        state.release_transport();
        state.mode = TransportMode::Socket;
        state.socket = Some(socket);
        state.last_activity = Instant::now();
        debug!(peer = %self.peer_id, "Client switched to socket");
    }

    /// True while `socket` is the channel this client writes to
    pub fn owns_socket(&self, socket: &mpsc::WeakSender<String>) -> bool {
        let Some(socket) = socket.upgrade() else {
            return false;
        };
        let state = self.state.lock();
        state.socket.as_ref().is_some_and(|s| s.same_channel(&socket))
    }

    /// Attach a long-poll request, switching to polling if needed.
    ///
    /// Fails with [`Error::PollConflict`] while another poll is held.
    pub fn attach_poll(&self) -> Result<PollAttach> {
        let mut state = self.state.lock();

        if state.mode == TransportMode::Socket {
            state.release_transport();
            state.mode = TransportMode::Polling;
            debug!(peer = %self.peer_id, "Client switched to polling");
        }

        if state.poll_writer.as_ref().is_some_and(|w| !w.is_closed()) {
            return Err(Error::PollConflict {
                peer_id: self.peer_id.clone(),
            });
        }

        state.last_activity = Instant::now();

        if !state.queue.is_empty() {
            state.linger = None;
            let queued = std::mem::take(&mut state.queue);
            return Ok(PollAttach::Ready(Value::Array(queued).to_string()));
        }

        let (tx, rx) = oneshot::channel();
        state.poll_writer = Some(tx);
        Ok(PollAttach::Wait(rx))
    }

    /// Release the held poll on timeout, returning any queued body
    pub fn release_poll(&self) -> Option<String> {
        let mut state = self.state.lock();
        state.linger = None;
        state.poll_writer = None;
        if state.queue.is_empty() {
            None
        } else {
            let queued = std::mem::take(&mut state.queue);
            Some(Value::Array(queued).to_string())
        }
    }

    /// The held response went away before it was answered.
    /// Returns true if this client is still polling.
    pub fn abort_poll(&self) -> bool {
        let mut state = self.state.lock();
        state.linger = None;
        state.poll_writer = None;
        state.mode == TransportMode::Polling
    }

    // ─────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────

    /// Deliver one serialized message. `false` means the client is
    /// unreachable and should be unregistered.
    pub fn send(self: &Arc<Self>, payload: String) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }

        match state.mode {
            TransportMode::Socket => {
                let Some(socket) = state.socket.as_ref() else {
                    return false;
                };
                match socket.try_send(payload) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(peer = %self.peer_id, "Socket send buffer full, dropping client");
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            }
            TransportMode::Polling => {
                if state.queue.len() >= self.options.polling_queue_size {
                    debug!(peer = %self.peer_id, "Polling queue full");
                    return false;
                }
                let value = match serde_json::from_str::<Value>(&payload) {
                    Ok(value) => value,
                    Err(_) => Value::String(payload),
                };
                state.queue.push(value);

                if state.linger.is_none() {
                    let client = Arc::downgrade(self);
                    state.linger = Some(TimerGuard::after(self.options.polling_linger, move || {
                        flush_linger(client)
                    }));
                }
                true
            }
        }
    }

    /// Hand the queue to the held response, if there is one
    fn flush_poll(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.linger.take() {
            timer.disarm();
        }
        if state.queue.is_empty() {
            return;
        }
        let Some(writer) = state.poll_writer.take() else {
            return;
        };

        let queued = std::mem::take(&mut state.queue);
        if let Err(body) = writer.send(Value::Array(queued).to_string()) {
            debug!(peer = %self.peer_id, bytes = body.len(), "Poll response gone before flush");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Activity
    // ─────────────────────────────────────────────────────────────

    pub fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.state.lock().last_activity
    }

    /// Idle strictly longer than the limit of the current mode
    pub fn is_expired(&self, now: Instant) -> bool {
        let state = self.state.lock();
        now.saturating_duration_since(state.last_activity) > state.mode.idle_limit()
    }

    /// Record `missing_peer` as the latest not-found target.
    /// Returns false if it already was, so no second reply goes out.
    pub fn remember_not_found(&self, missing_peer: &str) -> bool {
        let mut state = self.state.lock();
        if state.not_found_cache.as_deref() == Some(missing_peer) {
            return false;
        }
        state.not_found_cache = Some(missing_peer.to_string());
        true
    }

    /// Release the transport. Safe to call any number of times.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.release_transport();
        debug!(peer = %self.peer_id, mode = state.mode.as_str(), "Client closed");
    }
}

async fn flush_linger(client: Weak<Client>) {
    if let Some(client) = client.upgrade() {
        client.flush_poll();
    }
}
