//! Per-frame compression
//!
//! Each frame body is compressed independently: a [`CompressionStream`]
//! accumulates one message, and `finish()` emits it as a single
//! length-prefixed frame on the wrapped writer. [`DecompressionStream`]
//! does the reverse one frame at a time. No dictionary or window state
//! survives between frames, so a reconnect never has to resynchronise
//! codec state with the server.
//!
//! With [`CompressionAlgorithm::None`] both streams pass bodies through
//! unchanged, keeping one code path for the worker.

use crate::core::config::{CompressionAlgorithm, CompressionConfig};
use crate::error::{MeshError, Result};
use crate::protocol::codec::{read_frame, write_frame};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::{self, Read, Write};

fn compression_error(context: &str, e: io::Error) -> MeshError {
    MeshError::Compression(format!("{}: {}", context, e))
}

enum Encoder {
    Identity(Vec<u8>),
    Deflate(DeflateEncoder<Vec<u8>>),
    Gzip(GzEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl Encoder {
    fn new(config: &CompressionConfig) -> Result<Self> {
        let flate_level = || Compression::new(config.level.clamp(0, 9) as u32);
        Ok(match config.algorithm {
            CompressionAlgorithm::None => Encoder::Identity(Vec::new()),
            CompressionAlgorithm::Deflate => Encoder::Deflate(DeflateEncoder::new(Vec::new(), flate_level())),
            CompressionAlgorithm::Gzip => Encoder::Gzip(GzEncoder::new(Vec::new(), flate_level())),
            CompressionAlgorithm::Zstd => Encoder::Zstd(
                zstd::stream::write::Encoder::new(Vec::new(), config.level)
                    .map_err(|e| compression_error("Failed to create zstd encoder", e))?,
            ),
        })
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Encoder::Identity(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            Encoder::Deflate(encoder) => encoder.write_all(data),
            Encoder::Gzip(encoder) => encoder.write_all(data),
            Encoder::Zstd(encoder) => encoder.write_all(data),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Encoder::Identity(buf) => Ok(buf),
            Encoder::Deflate(encoder) => encoder.finish(),
            Encoder::Gzip(encoder) => encoder.finish(),
            Encoder::Zstd(encoder) => encoder.finish(),
        }
    }
}

/// Compressing writer emitting one frame per `finish()`
pub struct CompressionStream<W: Write> {
    inner: W,
    config: CompressionConfig,
    max_frame_size: usize,
    pending: Option<Encoder>,
    raw_len: usize,
}

impl<W: Write> CompressionStream<W> {
    pub fn new(inner: W, config: CompressionConfig, max_frame_size: usize) -> Self {
        Self {
            inner,
            config,
            max_frame_size,
            pending: None,
            raw_len: 0,
        }
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.config.algorithm
    }

    /// Append bytes to the current frame
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.raw_len + data.len() > self.max_frame_size {
            return Err(MeshError::ResourceExhausted(format!(
                "Frame body of {} bytes exceeds limit of {} bytes",
                self.raw_len + data.len(),
                self.max_frame_size
            )));
        }
        let encoder = match self.pending.take() {
            Some(encoder) => encoder,
            None => Encoder::new(&self.config)?,
        };
        self.pending
            .insert(encoder)
            .write_all(data)
            .map_err(|e| compression_error("Failed to compress frame", e))?;
        self.raw_len += data.len();
        Ok(())
    }

    /// Compress the accumulated bytes and write them as one frame
    ///
    /// Returns the number of body bytes put on the wire. Calling `finish()`
    /// with nothing written emits an empty frame.
    pub fn finish(&mut self) -> Result<usize> {
        let encoder = match self.pending.take() {
            Some(encoder) => encoder,
            None => Encoder::new(&self.config)?,
        };
        self.raw_len = 0;
        let body = encoder
            .finish()
            .map_err(|e| compression_error("Failed to finish compressed frame", e))?;
        write_frame(&mut self.inner, &body, self.max_frame_size)?;
        Ok(body.len())
    }

    /// Drop any unfinished frame and hand back the wrapped writer
    pub fn release(self) -> W {
        self.inner
    }
}

/// Decompressing reader yielding one frame body per `next_frame()`
pub struct DecompressionStream<R: Read> {
    inner: R,
    algorithm: CompressionAlgorithm,
    max_frame_size: usize,
}

impl<R: Read> DecompressionStream<R> {
    pub fn new(inner: R, algorithm: CompressionAlgorithm, max_frame_size: usize) -> Self {
        Self {
            inner,
            algorithm,
            max_frame_size,
        }
    }

    /// Read one frame and return its decompressed body
    ///
    /// Decompressed output is capped at `max_frame_size` as well.
    pub fn next_frame(&mut self) -> Result<Vec<u8>> {
        let body = read_frame(&mut self.inner, self.max_frame_size)?;
        self.decode(body)
    }

    fn decode(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        let limit = self.max_frame_size as u64 + 1;
        let mut out = Vec::new();
        let read = match self.algorithm {
            CompressionAlgorithm::None => return Ok(body),
            CompressionAlgorithm::Deflate => DeflateDecoder::new(&body[..]).take(limit).read_to_end(&mut out),
            CompressionAlgorithm::Gzip => GzDecoder::new(&body[..]).take(limit).read_to_end(&mut out),
            CompressionAlgorithm::Zstd => zstd::stream::read::Decoder::new(&body[..])
                .and_then(|decoder| decoder.take(limit).read_to_end(&mut out)),
        };
        read.map_err(|e| compression_error("Failed to decompress frame", e))?;

        if out.len() > self.max_frame_size {
            return Err(MeshError::ResourceExhausted(format!(
                "Decompressed frame exceeds limit of {} bytes",
                self.max_frame_size
            )));
        }
        Ok(out)
    }

    pub fn release(self) -> R {
        self.inner
    }
}
