//! Pull endpoint for the metrics registry
//!
//! A minimal HTTP/1.1 responder on tokio: `GET <path>` returns
//! [`Registry::export`], anything else is a 404. One request per
//! connection; the listener stops when the shutdown `Notify` fires.

use super::registry::Registry;
use crate::error::{MeshError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Longest request or header line read before giving up on the terminator
const MAX_REQUEST_LINE: u64 = 8192;

pub struct MetricsExporter {
    listener: TcpListener,
    registry: Arc<Registry>,
    path: String,
    shutdown: Arc<Notify>,
}

impl MetricsExporter {
    /// Bind the endpoint; use port 0 for an ephemeral port
    pub async fn bind(addr: &str, path: impl Into<String>, registry: Arc<Registry>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MeshError::ConnectionFailed(format!("Failed to bind metrics endpoint {}: {}", addr, e)))?;

        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        Ok(Self {
            listener,
            registry,
            path,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MeshError::ConnectionFailed(e.to_string()))
    }

    /// Handle to stop [`serve`](Self::serve) with `notify_one()`
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Accept scrapes until shutdown is signalled
    pub async fn serve(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Metrics endpoint listening on http://{}{}", addr, self.path),
            Err(_) => info!("Metrics endpoint listening on {}", self.path),
        }

        let path: Arc<str> = Arc::from(self.path.as_str());
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Metrics endpoint shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Metrics scrape from {}", addr);
                        let registry = Arc::clone(&self.registry);
                        let path = Arc::clone(&path);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &registry, &path).await {
                                debug!("Metrics connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept metrics connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, registry: &Registry, path: &str) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    (&mut reader).take(MAX_REQUEST_LINE).read_line(&mut line).await?;
    let request_line = line.trim_end().to_string();
    debug!("Metrics request: {}", request_line);

    // Consume headers up to the blank line; the body is ignored
    loop {
        let mut header = String::new();
        let n = (&mut reader).take(MAX_REQUEST_LINE).read_line(&mut header).await?;
        if n == 0 || header.trim_end().is_empty() {
            break;
        }
    }

    let response = match parse_request_line(&request_line) {
        Some(("GET", target)) if strip_query(target) == path => {
            let body = registry.export();
            format!(
                "HTTP/1.1 200 OK\r\n\
                 Content-Type: {}\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\
                 \r\n\
                 {}",
                CONTENT_TYPE,
                body.len(),
                body
            )
        }
        _ => not_found(),
    };

    let stream = reader.get_mut();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    Some((parts.next()?, parts.next()?))
}

fn strip_query(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}

fn not_found() -> String {
    let body = "not found\n";
    format!(
        "HTTP/1.1 404 Not Found\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_parsing() {
        assert_eq!(parse_request_line("GET /metrics HTTP/1.1"), Some(("GET", "/metrics")));
        assert_eq!(parse_request_line(""), None);
        assert_eq!(strip_query("/metrics?name=x"), "/metrics");
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_export_and_404() {
        let registry = Arc::new(Registry::new());
        registry.register_counter("scrapes_total", "Scrapes").unwrap().inc(3);

        let exporter = MetricsExporter::bind("127.0.0.1:0", "metrics", Arc::clone(&registry))
            .await
            .unwrap();
        let addr = exporter.local_addr().unwrap();
        let shutdown = exporter.shutdown_handle();
        let server = tokio::spawn(exporter.serve());

        let ok = get(addr, "/metrics").await;
        assert!(ok.starts_with("HTTP/1.1 200 OK"));
        assert!(ok.contains(CONTENT_TYPE));
        assert!(ok.contains("scrapes_total 3"));

        let missing = get(addr, "/other").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        // A request line split across writes is read up to its terminator
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /met").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stream.write_all(b"rics HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        let mut split = String::new();
        stream.read_to_string(&mut split).await.unwrap();
        assert!(split.starts_with("HTTP/1.1 200 OK"), "{}", split);

        shutdown.notify_one();
        server.await.unwrap();
    }
}
