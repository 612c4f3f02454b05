use crate::core::config::TimeoutConfig;
use crate::error::{MeshError, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

/// Byte stream to the server, plain or under TLS
///
/// Both variants are driven through `Read + Write`, so framing and
/// compression never care which one is live.
#[derive(Debug)]
pub enum TransportStream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl TransportStream {
    /// The underlying socket, for timeouts and shutdown
    pub fn tcp(&self) -> &TcpStream {
        match self {
            TransportStream::Plain(stream) => stream,
            TransportStream::Tls(stream) => stream.get_ref(),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, TransportStream::Tls(_))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Close the session; TLS sends close_notify first
    pub fn shutdown(&mut self) {
        if let TransportStream::Tls(stream) = self {
            let _ = stream.shutdown();
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

impl Read for TransportStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TransportStream::Plain(stream) => stream.read(buf),
            TransportStream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for TransportStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TransportStream::Plain(stream) => stream.write(buf),
            TransportStream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TransportStream::Plain(stream) => stream.flush(),
            TransportStream::Tls(stream) => stream.flush(),
        }
    }
}

/// Resolve `host:port` and connect to the first address that answers
///
/// The connect timeout bounds the whole resolution list, not each address.
pub fn connect_tcp(host: &str, port: u16, timeouts: &TimeoutConfig) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| MeshError::ConnectionFailed(format!("Failed to resolve {}:{}: {}", host, port, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(MeshError::ConnectionFailed(format!(
            "{}:{} resolved to no addresses",
            host, port
        )));
    }

    let deadline = Instant::now() + timeouts.connect();
    let mut last_error = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => {
                debug!("TCP connected to {}", addr);
                configure_socket(&stream, timeouts)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("TCP connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            MeshError::ConnectTimeout(format!("{}:{}: {}", host, port, e))
        }
        Some(e) => MeshError::ConnectionFailed(format!("{}:{}: {}", host, port, e)),
        None => MeshError::ConnectTimeout(format!(
            "{}:{}: no address answered within {:?}",
            host,
            port,
            timeouts.connect()
        )),
    })
}

fn configure_socket(stream: &TcpStream, timeouts: &TimeoutConfig) -> Result<()> {
    let setup = |e: io::Error| MeshError::ConnectionFailed(format!("Failed to configure socket: {}", e));
    stream.set_nodelay(true).map_err(setup)?;
    stream.set_read_timeout(non_zero(timeouts.read())).map_err(setup)?;
    stream.set_write_timeout(non_zero(timeouts.write())).map_err(setup)?;
    Ok(())
}

/// `set_*_timeout` rejects a zero duration
fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}
