//! Common test utilities for meshwire integration tests
//!
//! Provides a blocking mock hub speaking the framed protocol: it answers
//! `Ping` with `Pong`, `Auth` with `AuthResult`, and echoes everything else
//! unless a custom responder is installed.

#![allow(dead_code)]

use meshwire::protocol::{decode_message, encode_message, DEFAULT_MAX_FRAME_SIZE};
use meshwire::transport::{CompressionStream, DecompressionStream};
use meshwire::{CompressionAlgorithm, CompressionConfig, Message, Payload};
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Builds the response to one non-control request
pub type Responder = Arc<dyn Fn(&Message) -> Message + Send + Sync>;

/// Mock server behaviour
#[derive(Clone)]
pub struct MockOptions {
    /// Token the `Auth` header must carry; any header is accepted when `None`
    pub token: Option<String>,
    pub compression: CompressionConfig,
    pub responder: Option<Responder>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            token: None,
            compression: CompressionConfig::new(CompressionAlgorithm::None, 0),
            responder: None,
        }
    }
}

/// Counters shared with the connection threads
#[derive(Default)]
pub struct ServerStats {
    pub connections: AtomicUsize,
    pub requests: AtomicUsize,
    pub pings: AtomicUsize,
    pub auth_attempts: AtomicUsize,
}

/// A blocking mock hub bound to localhost
pub struct MockServer {
    pub addr: SocketAddr,
    pub stats: Arc<ServerStats>,
    shutdown: Arc<AtomicBool>,
    live: Arc<Mutex<Vec<TcpStream>>>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start an echoing server on an ephemeral port
    pub fn start() -> Self {
        Self::with_options("127.0.0.1:0".parse().unwrap(), MockOptions::default())
    }

    /// Start on a fixed address, e.g. to come back after `shutdown()`
    pub fn start_on(addr: SocketAddr) -> Self {
        Self::with_options(addr, MockOptions::default())
    }

    pub fn with_options(addr: SocketAddr, options: MockOptions) -> Self {
        let listener = TcpListener::bind(addr).unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ServerStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let live = Arc::new(Mutex::new(Vec::new()));

        let acceptor = {
            let stats = Arc::clone(&stats);
            let shutdown = Arc::clone(&shutdown);
            let live = Arc::clone(&live);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { break };
                    if let Ok(handle) = stream.try_clone() {
                        live.lock().push(handle);
                    }
                    stats.connections.fetch_add(1, Ordering::SeqCst);
                    let stats = Arc::clone(&stats);
                    let options = options.clone();
                    thread::spawn(move || handle_connection(stream, options, stats));
                }
            })
        };

        Self {
            addr,
            stats,
            shutdown,
            live,
            acceptor: Some(acceptor),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.stats.pings.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting and close every live connection
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the acceptor
        let _ = TcpStream::connect_timeout(&self.addr, Duration::from_millis(200));
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        for stream in self.live.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_connection(mut stream: TcpStream, options: MockOptions, stats: Arc<ServerStats>) {
    loop {
        let mut reader = DecompressionStream::new(&mut stream, options.compression.algorithm, DEFAULT_MAX_FRAME_SIZE);
        let Ok(frame) = reader.next_frame() else { return };
        let Ok(request) = decode_message(&frame) else { return };

        let response = match request.payload {
            Payload::Ping { timestamp } => {
                stats.pings.fetch_add(1, Ordering::SeqCst);
                request.reply(Payload::Pong { timestamp })
            }
            Payload::Auth { ref header } => {
                stats.auth_attempts.fetch_add(1, Ordering::SeqCst);
                let accepted = match options.token {
                    Some(ref token) => *header == format!("Bearer {}", token),
                    None => true,
                };
                request.reply(Payload::AuthResult {
                    accepted,
                    reason: (!accepted).then(|| "invalid token".to_string()),
                })
            }
            _ => {
                stats.requests.fetch_add(1, Ordering::SeqCst);
                match options.responder {
                    Some(ref responder) => responder(&request),
                    None => request.clone(),
                }
            }
        };

        let Ok(body) = encode_message(&response) else { return };
        let mut writer = CompressionStream::new(&mut stream, options.compression, DEFAULT_MAX_FRAME_SIZE);
        if writer.write(&body).is_err() || writer.finish().is_err() {
            return;
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A plain domain message from the test node
pub fn status_message() -> Message {
    Message::new(
        "node-1",
        "hub",
        Payload::SystemStatus {
            cpu_percent: 42.0,
            memory_percent: 63.5,
            uptime_secs: 3600,
            healthy: true,
        },
    )
}
