//! TLS session setup on top of a connected socket
//!
//! Delegates to the platform TLS library through `native-tls`. Everything
//! the backend can enforce is enforced; cipher-suite allow-lists and a
//! TLS 1.3 floor cannot be expressed through it and are logged instead.

use super::stream::TransportStream;
use crate::core::config::{TlsConfig, TlsVersion};
use crate::error::{MeshError, Result};
use native_tls::{Certificate, HandshakeError, Identity, Protocol, TlsConnector};
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, info, warn};

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| MeshError::Tls(format!("Failed to read {} '{}': {}", what, path.display(), e)))
}

fn min_protocol(version: TlsVersion) -> Protocol {
    match version {
        TlsVersion::Tls10 => Protocol::Tlsv10,
        TlsVersion::Tls11 => Protocol::Tlsv11,
        TlsVersion::Tls12 => Protocol::Tlsv12,
        TlsVersion::Tls13 => {
            warn!("TLS 1.3 minimum cannot be enforced by the platform backend, using TLS 1.2");
            Protocol::Tlsv12
        }
    }
}

/// Upper bound; `None` lets the backend negotiate its newest version
fn max_protocol(version: TlsVersion) -> Option<Protocol> {
    match version {
        TlsVersion::Tls10 => Some(Protocol::Tlsv10),
        TlsVersion::Tls11 => Some(Protocol::Tlsv11),
        TlsVersion::Tls12 => Some(Protocol::Tlsv12),
        TlsVersion::Tls13 => None,
    }
}

/// Build a connector from configuration
pub fn build_connector(config: &TlsConfig) -> Result<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if let Some(ref ca_path) = config.ca_path {
        let pem = read_pem(ca_path, "CA bundle")?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|e| MeshError::Tls(format!("Invalid CA certificate: {}", e)))?;
        builder.add_root_certificate(certificate);
        debug!("Added trust root from {}", ca_path.display());
    }

    if let (Some(ref cert_path), Some(ref key_path)) = (&config.cert_path, &config.key_path) {
        let cert = read_pem(cert_path, "client certificate")?;
        let key = read_pem(key_path, "client key")?;
        let identity = Identity::from_pkcs8(&cert, &key)
            .map_err(|e| MeshError::Tls(format!("Invalid client identity: {}", e)))?;
        builder.identity(identity);
        debug!("Using client certificate {}", cert_path.display());
    }

    if !config.verify_certificate {
        warn!("TLS certificate verification is disabled");
        builder.danger_accept_invalid_certs(true);
    }
    if !config.verify_hostname {
        warn!("TLS hostname verification is disabled");
        builder.danger_accept_invalid_hostnames(true);
    }

    builder.min_protocol_version(config.min_version.map(min_protocol));
    builder.max_protocol_version(config.max_version.and_then(max_protocol));

    if !config.cipher_suites.is_empty() {
        warn!(
            "Cipher-suite allow-list ({}) is not enforceable by the platform TLS backend",
            config.cipher_suites.join(", ")
        );
    }

    builder
        .build()
        .map_err(|e| MeshError::Tls(format!("Failed to build TLS connector: {}", e)))
}

/// Run the client handshake over `tcp`
///
/// `host` is used for SNI and hostname verification unless the config
/// carries a `server_name` override.
pub fn wrap(tcp: TcpStream, host: &str, config: &TlsConfig) -> Result<TransportStream> {
    let connector = build_connector(config)?;
    let domain = config.server_name.as_deref().unwrap_or(host);

    match connector.connect(domain, tcp) {
        Ok(stream) => {
            info!("TLS session established with {}", domain);
            Ok(TransportStream::Tls(Box::new(stream)))
        }
        // Blocking sockets only report WouldBlock when the read timeout fires
        Err(HandshakeError::WouldBlock(_)) => Err(MeshError::ConnectTimeout(format!(
            "TLS handshake with {} timed out",
            domain
        ))),
        Err(HandshakeError::Failure(e)) => Err(MeshError::Tls(format!(
            "TLS handshake with {} failed: {}",
            domain, e
        ))),
    }
}
