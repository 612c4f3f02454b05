//! The I/O worker thread
//!
//! ```text
//!        ┌──────────── wait on condvar ◄─────────────────────────┐
//!        │ connect requested                                     │
//!        v                                                       │
//!   establish (RetryPolicy) ── gave up ──> Disconnected + error ─┤
//!        │ Ready                                                 │
//!        v                                                       │
//!   process queue ── disconnect() ───────────────────────────────┤
//!        │ I/O failure                                           │
//!        v                                                       │
//!   teardown ── auto_reconnect ──> establish (RetryPolicy) ...   │
//!        └── otherwise ──────────────────────────────────────────┘
//! ```
//!
//! The worker owns the transport stream; the state mutex only holds a
//! cloned socket handle so `disconnect()` and `shutdown()` can unblock a
//! read from another thread.

use crate::core::auth::AuthManager;
use crate::core::client::{ClientEvent, Outbound, Shared};
use crate::core::connection_state::ConnectionState;
use crate::core::heartbeat::Heartbeat;
use crate::error::{MeshError, Result};
use crate::protocol::{decode_message, encode_message, Message, Payload};
use crate::transport::{connect_tcp, tls, CompressionStream, DecompressionStream, TransportStream};
use crossbeam_channel::TrySendError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on one queue poll, so shutdown and disconnect are noticed
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why a session's processing loop returned
enum SessionEnd {
    /// `shutdown()` was called
    Shutdown,
    /// `disconnect()` or a newer `connect()` superseded this session
    Superseded,
    /// The stream failed
    Failed(MeshError),
}

pub(crate) fn spawn(shared: Arc<Shared>, auth: Option<AuthManager>) -> Result<JoinHandle<()>> {
    let heartbeat = shared.config.heartbeat_interval().map(Heartbeat::new);
    let worker = Worker {
        shared,
        auth,
        heartbeat,
    };
    thread::Builder::new()
        .name("meshwire-io".into())
        .spawn(move || worker.run())
        .map_err(|e| MeshError::ResourceExhausted(format!("Failed to spawn I/O worker: {}", e)))
}

struct Worker {
    shared: Arc<Shared>,
    auth: Option<AuthManager>,
    heartbeat: Option<Heartbeat>,
}

impl Worker {
    fn run(mut self) {
        debug!("I/O worker started");

        while let Some(generation) = self.wait_for_request() {
            let mut stream = match self.establish(generation, false) {
                Ok(stream) => stream,
                Err(e) => {
                    self.connect_failed(generation, e);
                    continue;
                }
            };

            // Session loop: process, and reconnect after failures while allowed
            loop {
                match self.process(&mut stream, generation) {
                    SessionEnd::Shutdown => {
                        self.teardown(stream, generation, None);
                        debug!("I/O worker exiting");
                        return;
                    }
                    SessionEnd::Superseded => {
                        debug!("Session {} superseded, dropping stream", generation);
                        drop(stream);
                        break;
                    }
                    SessionEnd::Failed(e) => {
                        warn!("Session failed: {}", e);
                        if !self.teardown(stream, generation, Some(&e)) {
                            break;
                        }
                        if !self.shared.config.auto_reconnect || self.shared.is_shutting_down() {
                            break;
                        }

                        self.shared.metrics.reconnects.inc(1);
                        match self.establish(generation, true) {
                            Ok(next) => stream = next,
                            Err(e) => {
                                self.connect_failed(generation, e);
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!("I/O worker exiting");
    }

    /// Sleep on the condvar until a connect request; `None` on shutdown
    fn wait_for_request(&self) -> Option<u64> {
        let mut inner = self.shared.inner.lock();
        loop {
            if self.shared.is_shutting_down() {
                return None;
            }
            if inner.connect_requested {
                inner.connect_requested = false;
                return Some(inner.generation);
            }
            self.shared.cond.wait(&mut inner);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.shared.is_shutting_down() && self.shared.inner.lock().generation == generation
    }

    /// Run the connect chain under the retry policy
    fn establish(&mut self, generation: u64, reconnecting: bool) -> Result<TransportStream> {
        let shared = Arc::clone(&self.shared);
        let outcome = shared.retry.with_retry_interruptible(
            |attempt| {
                if reconnecting {
                    info!("Reconnection attempt {}", attempt);
                    self.shared.emit(ClientEvent::Reconnecting(attempt));
                }
                self.attempt(generation)
            },
            |delay| wait_interruptible(&shared, delay, generation),
        )?;

        if outcome.attempts > 1 {
            info!(
                "Connected after {} attempts ({:?} in backoff)",
                outcome.attempts, outcome.total_delay
            );
        }
        Ok(outcome.value)
    }

    /// One pass of the connect chain; marks `Errored` on failure
    fn attempt(&mut self, generation: u64) -> Result<TransportStream> {
        match self.connect_internal(generation) {
            Ok(stream) => Ok(stream),
            Err(e) => {
                let mut inner = self.shared.inner.lock();
                if inner.generation == generation {
                    inner.socket = None;
                    inner.authenticated = false;
                    self.shared.set_state(&mut inner, ConnectionState::Errored);
                }
                debug!("Connect attempt failed: {}", e);
                Err(e)
            }
        }
    }

    /// resolve -> TCP -> [TLS] -> [auth] -> Ready
    fn connect_internal(&mut self, generation: u64) -> Result<TransportStream> {
        let shared = Arc::clone(&self.shared);
        let config = &shared.config;
        self.enter(generation, ConnectionState::Connecting)?;

        let tcp = connect_tcp(&config.host, config.port, &config.timeouts)?;
        let socket = tcp
            .try_clone()
            .map_err(|e| MeshError::ConnectionFailed(format!("Failed to clone socket: {}", e)))?;
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || self.shared.is_shutting_down() {
                let _ = socket.shutdown(std::net::Shutdown::Both);
                return Err(MeshError::Cancelled("connect superseded".into()));
            }
            inner.socket = Some(socket);
        }

        let mut stream = match config.tls {
            Some(ref tls_config) => tls::wrap(tcp, &config.host, tls_config)?,
            None => TransportStream::Plain(tcp),
        };
        self.enter(generation, ConnectionState::Connected)?;
        debug!(
            "Transport up to {} (tls: {}, compression: {:?})",
            config.address(),
            stream.is_tls(),
            config.compression.algorithm
        );

        if self.auth.is_some() {
            self.enter(generation, ConnectionState::Authenticating)?;
            self.handshake(&mut stream)?;
        }

        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || self.shared.is_shutting_down() {
                stream.shutdown();
                return Err(MeshError::Cancelled("connect superseded".into()));
            }
            inner.authenticated = self.auth.is_some();
            self.shared.set_state(&mut inner, ConnectionState::Ready);
            inner.outcome = Some((generation, Ok(())));
            self.shared.cond.notify_all();
        }

        if let Some(ref mut heartbeat) = self.heartbeat {
            heartbeat.reset();
        }
        info!("Connected to {}", config.address());
        self.shared.callbacks.connected();
        self.shared.emit(ClientEvent::Connected);
        Ok(stream)
    }

    /// Transition if this connect is still the current one
    fn enter(&self, generation: u64, state: ConnectionState) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.generation != generation || self.shared.is_shutting_down() {
            return Err(MeshError::Cancelled("connect superseded".into()));
        }
        self.shared.set_state(&mut inner, state);
        Ok(())
    }

    fn handshake(&mut self, stream: &mut TransportStream) -> Result<()> {
        let Some(ref mut auth) = self.auth else {
            return Ok(());
        };
        let config = &self.shared.config;
        let header = auth.auth_header()?;
        let request = Message::new(config.source_id.as_str(), config.host.as_str(), Payload::Auth { header });

        let response = exchange_frames(&self.shared, stream, &request)?;
        match response.payload {
            Payload::AuthResult { accepted: true, .. } => {
                info!("Authenticated with {}", config.address());
                Ok(())
            }
            Payload::AuthResult {
                accepted: false,
                reason,
            } => {
                let reason = reason.unwrap_or_else(|| "credential rejected".to_string());
                error!("Authentication rejected: {}", reason);
                Err(MeshError::AuthenticationFailed(reason))
            }
            other => Err(MeshError::ProtocolError(format!(
                "expected auth_result, got {}",
                other.kind()
            ))),
        }
    }

    /// Terminal connect failure: back to `Disconnected` with the error surfaced
    fn connect_failed(&self, generation: u64, e: MeshError) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation {
                // disconnect() or a newer connect() already took over
                debug!("Discarding connect failure of superseded session: {}", e);
                return;
            }
            inner.socket = None;
            inner.authenticated = false;
            self.shared.set_state(&mut inner, ConnectionState::Disconnected);
            inner.outcome = Some((generation, Err(e.clone())));
            self.shared.cond.notify_all();
        }

        if matches!(e, MeshError::Cancelled(_)) {
            debug!("Connect cancelled: {}", e);
            return;
        }
        error!("Failed to connect to {}: {}", self.shared.config.address(), e);
        self.shared.callbacks.error(&e);
        self.shared.emit(ClientEvent::Error(e.to_string()));
    }

    /// Drain the queue over a `Ready` session
    fn process(&mut self, stream: &mut TransportStream, generation: u64) -> SessionEnd {
        loop {
            if self.shared.is_shutting_down() {
                return SessionEnd::Shutdown;
            }
            if !self.is_current(generation) {
                return SessionEnd::Superseded;
            }

            let held = self.shared.held.lock().take();
            if let Some(outbound) = held {
                self.shared.update_queue_depth();
                if let Some(end) = self.deliver(stream, generation, outbound) {
                    return end;
                }
                continue;
            }

            let poll = match self.heartbeat {
                Some(ref heartbeat) => heartbeat.remaining().min(POLL_INTERVAL),
                None => POLL_INTERVAL,
            };

            match self.shared.queue.timed_dequeue(poll) {
                Ok(outbound) => {
                    if self.shared.is_shutting_down() {
                        self.shared.update_queue_depth();
                        outbound.complete(Err(MeshError::QueueClosed));
                        return SessionEnd::Shutdown;
                    }
                    // A send may have woken us after disconnect() closed the socket
                    if !self.is_current(generation) {
                        *self.shared.held.lock() = Some(outbound);
                        self.shared.update_queue_depth();
                        return SessionEnd::Superseded;
                    }
                    self.shared.update_queue_depth();
                    if let Some(end) = self.deliver(stream, generation, outbound) {
                        return end;
                    }
                }
                Err(MeshError::QueueTimeout) => {
                    if !self.is_current(generation) {
                        return SessionEnd::Superseded;
                    }
                    if let Some(end) = self.heartbeat_if_due(stream, generation) {
                        return end;
                    }
                }
                Err(_) => return SessionEnd::Shutdown,
            }
        }
    }

    /// Write one message, read its response and complete the callback
    fn deliver(&mut self, stream: &mut TransportStream, generation: u64, outbound: Outbound) -> Option<SessionEnd> {
        let started = Instant::now();
        let result = write_frame(&self.shared, stream, &outbound.message).and_then(|()| {
            self.shared.metrics.messages_sent.inc(1);
            read_frame(&self.shared, stream)
        });
        if let Some(ref mut heartbeat) = self.heartbeat {
            heartbeat.touch();
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.shared.metrics.send_errors.inc(1);
                outbound.complete(Err(e.clone()));
                return Some(self.classify_failure(e, generation));
            }
        };
        self.shared.metrics.observe_latency(started.elapsed());

        let original = response.clone();
        let processed = self.shared.recovery.lock().process(response);
        match processed {
            Ok(response) => {
                if response != original {
                    self.shared.metrics.repaired_messages.inc(1);
                }
                self.shared.metrics.messages_received.inc(1);
                outbound.complete(Ok(response.clone()));
                if let Err(TrySendError::Full(_)) = self.shared.inbound_tx.try_send(response) {
                    debug!("Inbound buffer full, response only delivered to callback");
                }
            }
            Err(e) => {
                self.shared.metrics.send_errors.inc(1);
                outbound.complete(Err(e.clone()));
                self.shared.callbacks.error(&e);
                self.shared.emit(ClientEvent::Error(e.to_string()));
            }
        }
        None
    }

    fn heartbeat_if_due(&mut self, stream: &mut TransportStream, generation: u64) -> Option<SessionEnd> {
        let heartbeat = self.heartbeat.as_mut()?;
        if !heartbeat.due() {
            return None;
        }

        let config = &self.shared.config;
        let ping = heartbeat.next_ping(&config.source_id, &config.host);
        self.shared.metrics.heartbeats_sent.inc(1);
        let result = exchange_frames(&self.shared, stream, &ping).and_then(|pong| heartbeat.check_pong(&pong));
        match result {
            Ok(_) => None,
            Err(e) => {
                warn!("Heartbeat failed: {}", e);
                Some(self.classify_failure(e, generation))
            }
        }
    }

    /// Failures after a superseding `disconnect()` are expected, not errors
    fn classify_failure(&self, e: MeshError, generation: u64) -> SessionEnd {
        if self.shared.is_shutting_down() {
            SessionEnd::Shutdown
        } else if !self.is_current(generation) {
            SessionEnd::Superseded
        } else {
            SessionEnd::Failed(e)
        }
    }

    /// Worker-side disconnect after a failure or on shutdown
    ///
    /// Returns `false` if `disconnect()` got there first.
    fn teardown(&mut self, mut stream: TransportStream, generation: u64, cause: Option<&MeshError>) -> bool {
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation && !self.shared.is_shutting_down() {
                return false;
            }
            let was_live = inner.state != ConnectionState::Disconnected;
            self.shared.set_state(&mut inner, ConnectionState::Disconnecting);
            stream.shutdown();
            inner.socket = None;
            inner.authenticated = false;
            self.shared.set_state(&mut inner, ConnectionState::Disconnected);
            self.shared.cond.notify_all();
            if !was_live {
                return true;
            }
        }
        if let Some(ref mut heartbeat) = self.heartbeat {
            heartbeat.reset();
        }

        info!("Session with {} closed", self.shared.config.address());
        self.shared.callbacks.disconnected(cause);
        self.shared.emit(ClientEvent::Disconnected);
        true
    }
}

/// Write `request` as one frame and read one response frame
fn exchange_frames(shared: &Shared, stream: &mut TransportStream, request: &Message) -> Result<Message> {
    write_frame(shared, stream, request)?;
    read_frame(shared, stream)
}

fn write_frame(shared: &Shared, stream: &mut TransportStream, request: &Message) -> Result<()> {
    let config = &shared.config;
    let body = encode_message(request)?;

    let mut writer = CompressionStream::new(&mut *stream, config.compression, config.max_frame_size);
    writer.write(&body)?;
    let written = writer.finish()?;
    writer.release();
    shared.metrics.bytes_sent.inc(written as u64);
    Ok(())
}

fn read_frame(shared: &Shared, stream: &mut TransportStream) -> Result<Message> {
    let config = &shared.config;
    let mut reader = DecompressionStream::new(&mut *stream, config.compression.algorithm, config.max_frame_size);
    let frame = reader.next_frame()?;
    reader.release();
    shared.metrics.bytes_received.inc(frame.len() as u64);

    decode_message(&frame)
}

/// Backoff sleep that aborts on shutdown or when the session is superseded
fn wait_interruptible(shared: &Shared, delay: Duration, generation: u64) -> bool {
    let deadline = Instant::now() + delay;
    let mut inner = shared.inner.lock();
    loop {
        if shared.is_shutting_down() || inner.generation != generation {
            return false;
        }
        if shared.cond.wait_until(&mut inner, deadline).timed_out() {
            return !shared.is_shutting_down() && inner.generation == generation;
        }
    }
}
