//! Wire framing and body encoding
//!
//! Every frame is a 4-byte big-endian length prefix followed by that many
//! bytes of body. The body is the UTF-8 JSON encoding of a [`Message`],
//! possibly compressed (see `transport::compression`).

use super::message::Message;
use crate::error::{MeshError, Result};
use std::io::{self, Read, Write};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;
/// Default upper bound on a single frame body
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Which side of the stream an I/O error happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// Map an I/O error to the protocol taxonomy
///
/// Socket timeouts surface as `WouldBlock` on Unix and `TimedOut` on
/// Windows, both become the read/write timeout for `direction`.
pub fn map_io_error(error: &io::Error, direction: IoDirection) -> MeshError {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => match direction {
            IoDirection::Read => MeshError::ReadTimeout(error.to_string()),
            IoDirection::Write => MeshError::WriteTimeout(error.to_string()),
        },
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => MeshError::ConnectionClosed(error.to_string()),
        _ => MeshError::ConnectionFailed(error.to_string()),
    }
}

/// Serialize a message body
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    serde_json::to_vec(message)
        .map_err(|e| MeshError::ProtocolError(format!("Failed to encode message: {}", e)))
}

/// Deserialize a message body
pub fn decode_message(body: &[u8]) -> Result<Message> {
    serde_json::from_slice(body)
        .map_err(|e| MeshError::ProtocolError(format!("Failed to decode message: {}", e)))
}

/// Write one length-prefixed frame and flush
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, body: &[u8], max_frame_size: usize) -> Result<()> {
    if body.len() > max_frame_size || body.len() > u32::MAX as usize {
        return Err(MeshError::ResourceExhausted(format!(
            "Outgoing frame of {} bytes exceeds limit of {} bytes",
            body.len(),
            max_frame_size
        )));
    }

    let prefix = (body.len() as u32).to_be_bytes();
    writer
        .write_all(&prefix)
        .and_then(|_| writer.write_all(body))
        .and_then(|_| writer.flush())
        .map_err(|e| map_io_error(&e, IoDirection::Write))
}

/// Read one length-prefixed frame
///
/// The declared length is checked against `max_frame_size` before anything
/// is allocated.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader
        .read_exact(&mut prefix)
        .map_err(|e| map_io_error(&e, IoDirection::Read))?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_size {
        return Err(MeshError::ResourceExhausted(format!(
            "Incoming frame of {} bytes exceeds limit of {} bytes",
            len, max_frame_size
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| map_io_error(&e, IoDirection::Read))?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Payload;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout_is_big_endian_prefix() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello", DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..], b"hello");
    }

    #[test]
    fn test_read_frame_rejects_oversized_prefix() {
        let mut data = Vec::new();
        data.extend_from_slice(&(1024u32).to_be_bytes());
        data.extend_from_slice(&[0u8; 16]);
        let err = read_frame(&mut Cursor::new(data), 512).unwrap_err();
        assert!(matches!(err, MeshError::ResourceExhausted(_)));
    }

    #[test]
    fn test_truncated_frame_is_connection_closed() {
        let mut data = Vec::new();
        data.extend_from_slice(&(10u32).to_be_bytes());
        data.extend_from_slice(b"abc");
        let err = read_frame(&mut Cursor::new(data), DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, MeshError::ConnectionClosed(_)));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let first = Message::ping("c", "s", 10);
        let second = Message::new("c", "s", Payload::Ack { timestamp: 11 }).with_timestamp(11);

        let mut buf = Vec::new();
        write_frame(&mut buf, &encode_message(&first).unwrap(), DEFAULT_MAX_FRAME_SIZE).unwrap();
        write_frame(&mut buf, &encode_message(&second).unwrap(), DEFAULT_MAX_FRAME_SIZE).unwrap();

        let mut cursor = Cursor::new(buf);
        let a = decode_message(&read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap()).unwrap();
        let b = decode_message(&read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).unwrap()).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
    }

    #[test]
    fn test_garbage_body_is_protocol_error() {
        assert!(matches!(
            decode_message(b"{not json"),
            Err(MeshError::ProtocolError(_))
        ));
    }
}
