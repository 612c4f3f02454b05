use crate::core::builder::{states, ClientBuilder};
use crate::core::config::ClientConfig;
use crate::core::connection_state::{AtomicConnectionState, ConnectionState};
use crate::core::queue::BoundedQueue;
use crate::core::retry::RetryPolicy;
use crate::core::worker;
use crate::metrics::{ClientMetrics, MetricsSnapshot, Registry};
use crate::protocol::{Message, MessageRecovery, RecoveryLogEntry, ValidatorRegistry};
use crate::traits::*;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle notifications, mirrored from the callbacks onto a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Session reached `Ready`
    Connected,
    /// Session torn down (by request or after an I/O failure)
    Disconnected,
    /// Automatic reconnection attempt number
    Reconnecting(u32),
    /// Failure not tied to a particular `send`
    Error(String),
}

/// A queued message with its completion callback
pub(crate) struct Outbound {
    pub message: Message,
    pub callback: Option<SendCallback>,
}

impl Outbound {
    pub fn complete(self, result: Result<Message>) {
        if let Some(callback) = self.callback {
            callback(result);
        }
    }
}

/// State guarded by the client's state mutex
pub(crate) struct Inner {
    pub state: ConnectionState,
    /// A connect request the worker has not picked up yet
    pub connect_requested: bool,
    /// Bumped by every connect request and every `disconnect()`; a worker
    /// session that sees a different value knows it was superseded
    pub generation: u64,
    /// Terminal result of the connect sequence for a generation
    pub outcome: Option<(u64, Result<()>)>,
    /// Handle on the live socket so other threads can shut it down
    pub socket: Option<TcpStream>,
    pub authenticated: bool,
}

/// Everything the public handle and the worker thread share
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub callbacks: Callbacks,
    pub inner: Mutex<Inner>,
    pub cond: Condvar,
    pub state: AtomicConnectionState,
    pub shutdown: AtomicBool,
    pub queue: BoundedQueue<Outbound>,
    /// Dequeued after its session was superseded; goes out first next session
    pub held: Mutex<Option<Outbound>>,
    pub retry: RetryPolicy,
    pub registry: Arc<Registry>,
    pub metrics: ClientMetrics,
    pub validators: Arc<ValidatorRegistry>,
    pub recovery: Mutex<MessageRecovery>,
    pub inbound_tx: Sender<Message>,
    pub event_tx: Sender<ClientEvent>,
}

impl Shared {
    /// Transition under the state mutex, keeping the atomic mirror in step
    pub fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            debug!("Connection state: {} -> {}", inner.state, state);
        }
        inner.state = state;
        self.state.set(state);
        self.metrics.set_state(state);
    }

    pub fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn update_queue_depth(&self) {
        self.metrics.queue_depth.set(self.pending() as i64);
    }

    /// Messages not yet written, including one held back by the worker
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.held.lock().is_some())
    }
}

/// Components assembled by the builder
pub(crate) struct ClientParts {
    pub config: ClientConfig,
    pub callbacks: Callbacks,
    pub retry: RetryPolicy,
    pub registry: Arc<Registry>,
    pub validators: Arc<ValidatorRegistry>,
    pub auth: Option<crate::core::auth::AuthManager>,
}

/// Reliable message client
///
/// One dedicated OS thread per client owns the socket. Producers on any
/// thread validate and enqueue; the worker writes each message as a frame,
/// reads the framed response and completes the message's callback.
///
/// ```text
/// send() ─┐                         ┌────────────── I/O worker ──────────────┐
/// send() ─┼─> BoundedQueue ────────>│ frame ─> [compress] ─> [TLS] ─> socket │
/// send() ─┘                         │ socket ─> [TLS] ─> [decompress] ─> msg │
///                                   └───┬───────────────────────┬────────────┘
///                                  callback(result)        recv() / events
/// ```
pub struct Client {
    shared: Arc<Shared>,
    inbound_rx: Receiver<Message>,
    event_rx: Receiver<ClientEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Client {
    /// Start building a client
    pub fn builder() -> ClientBuilder<states::NoAddress> {
        ClientBuilder::new()
    }

    pub(crate) fn start(parts: ClientParts) -> Result<Self> {
        let metrics = ClientMetrics::register(&parts.registry, &parts.config.metrics_prefix)?;
        let recovery = MessageRecovery::new(Arc::clone(&parts.validators), parts.config.recovery_max_attempts)
            .with_retry_delay(parts.retry.initial_delay);

        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(parts.config.queue_capacity);
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(parts.config.queue_capacity),
            held: Mutex::new(None),
            config: parts.config,
            callbacks: parts.callbacks,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                connect_requested: false,
                generation: 0,
                outcome: None,
                socket: None,
                authenticated: false,
            }),
            cond: Condvar::new(),
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            shutdown: AtomicBool::new(false),
            retry: parts.retry,
            registry: parts.registry,
            metrics,
            validators: parts.validators,
            recovery: Mutex::new(recovery),
            inbound_tx,
            event_tx,
        });

        let handle = worker::spawn(Arc::clone(&shared), parts.auth)?;

        Ok(Self {
            shared,
            inbound_rx,
            event_rx,
            worker: Some(handle),
        })
    }

    /// Connect and block until the session is `Ready`
    ///
    /// Returns the terminal connect error if the retry policy gives up, or
    /// `ConnectTimeout` once `retry.timeout + timeouts.connect` has passed.
    /// A timeout cancels the attempt and leaves the client `Disconnected`.
    /// Calling it while a connect is already in flight joins that attempt.
    pub fn connect(&self) -> Result<()> {
        if self.shared.is_shutting_down() {
            return Err(MeshError::Cancelled("client is shut down".into()));
        }

        let deadline = Instant::now() + self.shared.config.connect_deadline();
        let mut inner = self.shared.inner.lock();

        if inner.state == ConnectionState::Ready {
            return Ok(());
        }
        let joining = inner.connect_requested || inner.state.is_connecting();
        if !joining {
            inner.generation += 1;
            inner.connect_requested = true;
            inner.outcome = None;
            info!("Connecting to {}", self.shared.config.address());
            self.shared.cond.notify_all();
        }
        let generation = inner.generation;

        loop {
            if inner.generation != generation {
                return Err(MeshError::Cancelled("connect superseded by disconnect".into()));
            }
            if inner.state == ConnectionState::Ready {
                return Ok(());
            }
            if let Some((outcome_generation, ref result)) = inner.outcome {
                if outcome_generation == generation {
                    return result.clone();
                }
            }
            if self.shared.is_shutting_down() {
                return Err(MeshError::Cancelled("client is shutting down".into()));
            }
            if self.shared.cond.wait_until(&mut inner, deadline).timed_out() {
                if inner.generation == generation {
                    if inner.state == ConnectionState::Ready {
                        return Ok(());
                    }
                    // Cancel the attempt still in flight
                    inner.generation += 1;
                    inner.connect_requested = false;
                    if let Some(socket) = inner.socket.take() {
                        let _ = socket.shutdown(Shutdown::Both);
                    }
                    inner.authenticated = false;
                    self.shared.set_state(&mut inner, ConnectionState::Disconnected);
                    self.shared.cond.notify_all();
                    warn!("Connect to {} timed out, attempt cancelled", self.shared.config.address());
                }
                return Err(MeshError::ConnectTimeout(format!(
                    "not ready within {:?}",
                    self.shared.config.connect_deadline()
                )));
            }
        }
    }

    /// Tear the session down; a no-op when already disconnected
    ///
    /// Queued messages stay queued and go out after the next `connect()`.
    pub fn disconnect(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Disconnected && !inner.connect_requested {
                return;
            }

            inner.generation += 1;
            inner.connect_requested = false;
            if inner.state == ConnectionState::Disconnected {
                // Only a pending request to cancel, no session to tear down
                self.shared.cond.notify_all();
                return;
            }
            self.shared.set_state(&mut inner, ConnectionState::Disconnecting);
            if let Some(socket) = inner.socket.take() {
                let _ = socket.shutdown(Shutdown::Both);
            }
            inner.authenticated = false;
            self.shared.set_state(&mut inner, ConnectionState::Disconnected);
            self.shared.cond.notify_all();
        }

        info!("Disconnected from {}", self.shared.config.address());
        self.shared.callbacks.disconnected(None);
        self.shared.emit(ClientEvent::Disconnected);
    }

    /// Validate and enqueue, blocking while the queue is full
    pub fn send(&self, message: Message) -> Result<()> {
        self.enqueue(message, None, true)
    }

    /// As [`send`](Self::send); `callback` runs on the I/O worker with the
    /// response or the failure
    ///
    /// A message rejected here (invalid, queue closed) never reaches the
    /// worker and its callback is dropped without being called.
    pub fn send_with_callback<F>(&self, message: Message, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        self.enqueue(message, Some(Box::new(callback)), true)
    }

    /// Validate and enqueue without blocking; `QueueFull` at capacity
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.enqueue(message, None, false)
    }

    fn enqueue(&self, message: Message, callback: Option<SendCallback>, block: bool) -> Result<()> {
        self.shared.validators.validate(&message)?;

        let outbound = Outbound { message, callback };
        let queued = if block {
            self.shared.queue.enqueue(outbound)
        } else {
            self.shared.queue.try_enqueue(outbound)
        };
        self.shared.update_queue_depth();
        queued.map_err(MeshError::from)
    }

    /// Lock-free check for `Ready`
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Whether the last session completed the auth handshake
    pub fn is_authenticated(&self) -> bool {
        self.shared.inner.lock().authenticated
    }

    /// Block until a response arrives
    pub fn recv(&self) -> Result<Message> {
        self.inbound_rx
            .recv()
            .map_err(|_| MeshError::QueueClosed)
    }

    /// Wait up to `timeout` for a response
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message> {
        self.inbound_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => MeshError::QueueTimeout,
            RecvTimeoutError::Disconnected => MeshError::QueueClosed,
        })
    }

    /// Take a response if one is buffered
    pub fn try_recv(&self) -> Option<Message> {
        self.inbound_rx.try_recv().ok()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> std::result::Result<ClientEvent, crossbeam_channel::RecvError> {
        self.event_rx.recv()
    }

    /// Wait up to `timeout` for an event
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ClientEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Get current metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot(self.shared.state.get())
    }

    /// The registry this client's metrics live in
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.shared.registry)
    }

    /// Repairs and failed recoveries of received messages, oldest first
    pub fn recovery_log(&self) -> Vec<RecoveryLogEntry> {
        self.shared.recovery.lock().log()
    }

    /// Last response that passed validation
    ///
    /// After a failed recovery this is the message accepted before the
    /// episode started.
    pub fn last_good(&self) -> Option<Message> {
        self.shared.recovery.lock().last_good().cloned()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Messages waiting to be written
    pub fn queued(&self) -> usize {
        self.shared.pending()
    }

    /// Stop the worker and fail everything still queued
    ///
    /// Order: flag, wake, unblock the socket, join the worker, then close
    /// and drain the queue (pending callbacks receive `QueueClosed`).
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        info!("Shutting down client for {}", self.shared.config.address());

        self.shared.shutdown.store(true, Ordering::Release);
        {
            let inner = self.shared.inner.lock();
            if let Some(ref socket) = inner.socket {
                let _ = socket.shutdown(Shutdown::Both);
            }
            self.shared.cond.notify_all();
        }

        if handle.join().is_err() {
            warn!("I/O worker panicked");
        }

        self.shared.queue.close();
        let held = self.shared.held.lock().take();
        let pending: Vec<Outbound> = held.into_iter().chain(self.shared.queue.drain()).collect();
        if !pending.is_empty() {
            debug!("Failing {} queued messages", pending.len());
        }
        for outbound in pending {
            outbound.complete(Err(MeshError::QueueClosed));
        }
        self.shared.update_queue_depth();

        {
            let mut inner = self.shared.inner.lock();
            inner.socket = None;
            inner.authenticated = false;
            inner.connect_requested = false;
            self.shared.set_state(&mut inner, ConnectionState::Disconnected);
            self.shared.cond.notify_all();
        }
        info!("Client shut down");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.shared.config.address())
            .field("state", &self.shared.state.get())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}
