//! Frame codec: fixed header, payload, optional CRC32 trailer.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic        u32   = 0x54584C01  ("TXL\1")
//! version      u16
//! type         u16
//! flags        u16   (bit 0 = payload CRC32 present in trailer)
//! reserved     u16
//! session_id   16 bytes
//! sequence     u64
//! payload_len  u32
//! payload      payload_len bytes
//! [crc32       u32   if flags & FLAG_CHECKSUM]
//! ```

use std::io::{Read, Write};

use thiserror::Error;

use super::messages::Message;
use super::wire::{self, Reader};
use super::SessionId;

pub const FRAME_MAGIC: u32 = 0x5458_4C01;
pub const PROTOCOL_VERSION: u16 = 1;
pub const FLAG_CHECKSUM: u16 = 1;

/// Header size on the wire.
pub const HEADER_LEN: usize = 40;

/// Payloads larger than this fail decode rather than allocating.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// Errors surfaced by the frame and payload codecs. All of these are fatal
/// for the connection that produced them.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid frame magic {0:#010x}")]
    InvalidMagic(u32),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated payload: wanted {wanted} bytes, had {have}")]
    TruncatedPayload { wanted: usize, have: usize },
    #[error("payload checksum mismatch: frame carried {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("payload length {0} exceeds the {MAX_PAYLOAD_LEN} byte limit")]
    PayloadTooLarge(u32),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub msg_type: u16,
    pub flags: u16,
    pub session_id: [u8; 16],
    pub sequence: u64,
    pub payload_len: u32,
}

/// A received frame: validated header plus raw payload bytes. The payload is
/// decoded separately so unknown message types can be skipped instead of
/// killing the connection.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn session_id(&self) -> SessionId {
        SessionId::from_bytes(self.header.session_id)
    }

    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    /// Decode the payload into a typed message, or `None` for message types
    /// this build does not know about.
    pub fn message(&self) -> Result<Option<Message>, CodecError> {
        Message::decode_payload(self.header.msg_type, &self.payload)
    }
}

/// Serialize a frame for `message` into `buf`. The payload CRC is always
/// emitted; receivers that clear `FLAG_CHECKSUM` are tolerated on decode.
pub fn encode_frame(buf: &mut Vec<u8>, session_id: &SessionId, sequence: u64, message: &Message) {
    let mut payload = Vec::new();
    message.encode_payload(&mut payload);
    encode_raw_frame(buf, message.msg_type(), session_id, sequence, &payload);
}

/// Serialize a frame whose payload bytes are already encoded (the hot path
/// for replayed diff packets, which are encoded once at enqueue time).
pub fn encode_raw_frame(
    buf: &mut Vec<u8>,
    msg_type: u16,
    session_id: &SessionId,
    sequence: u64,
    payload: &[u8],
) {
    buf.reserve(HEADER_LEN + payload.len() + 4);
    wire::put_u32(buf, FRAME_MAGIC);
    wire::put_u16(buf, PROTOCOL_VERSION);
    wire::put_u16(buf, msg_type);
    wire::put_u16(buf, FLAG_CHECKSUM);
    wire::put_u16(buf, 0); // reserved
    wire::put_id(buf, session_id.as_bytes());
    wire::put_u64(buf, sequence);
    wire::put_u32(buf, payload.len() as u32);
    buf.extend_from_slice(payload);
    wire::put_u32(buf, crc32(payload));
}

/// Write a frame straight to a stream.
pub fn write_frame<W: Write>(
    w: &mut W,
    session_id: &SessionId,
    sequence: u64,
    message: &Message,
) -> Result<(), CodecError> {
    let mut buf = Vec::new();
    encode_frame(&mut buf, session_id, sequence, message);
    w.write_all(&buf)?;
    Ok(())
}

/// Write a pre-encoded payload straight to a stream.
pub fn write_raw_frame<W: Write>(
    w: &mut W,
    msg_type: u16,
    session_id: &SessionId,
    sequence: u64,
    payload: &[u8],
) -> Result<(), CodecError> {
    let mut buf = Vec::new();
    encode_raw_frame(&mut buf, msg_type, session_id, sequence, payload);
    w.write_all(&buf)?;
    Ok(())
}

/// Read and validate one frame from a stream. Blocks until a full frame
/// arrives or the stream errors; IO timeouts surface as `CodecError::Io`
/// with the underlying kind preserved.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Frame, CodecError> {
    let mut head = [0u8; HEADER_LEN];
    r.read_exact(&mut head)?;
    let header = decode_header(&head)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    r.read_exact(&mut payload)?;

    if header.flags & FLAG_CHECKSUM != 0 {
        let mut trailer = [0u8; 4];
        r.read_exact(&mut trailer)?;
        let expected = u32::from_le_bytes(trailer);
        let computed = crc32(&payload);
        if expected != computed {
            return Err(CodecError::ChecksumMismatch { expected, computed });
        }
    }

    Ok(Frame { header, payload })
}

/// Decode a frame from an in-memory buffer, returning the frame and the
/// number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::TruncatedPayload {
            wanted: HEADER_LEN,
            have: buf.len(),
        });
    }
    let header = decode_header(&buf[..HEADER_LEN])?;
    let payload_end = HEADER_LEN + header.payload_len as usize;
    let trailer_len = if header.flags & FLAG_CHECKSUM != 0 { 4 } else { 0 };
    if buf.len() < payload_end + trailer_len {
        return Err(CodecError::TruncatedPayload {
            wanted: payload_end + trailer_len,
            have: buf.len(),
        });
    }
    let payload = buf[HEADER_LEN..payload_end].to_vec();
    if trailer_len > 0 {
        let expected = u32::from_le_bytes([
            buf[payload_end],
            buf[payload_end + 1],
            buf[payload_end + 2],
            buf[payload_end + 3],
        ]);
        let computed = crc32(&payload);
        if expected != computed {
            return Err(CodecError::ChecksumMismatch { expected, computed });
        }
    }
    Ok((Frame { header, payload }, payload_end + trailer_len))
}

fn decode_header(head: &[u8]) -> Result<FrameHeader, CodecError> {
    let mut r = Reader::new(head);
    let magic = r.u32()?;
    if magic != FRAME_MAGIC {
        return Err(CodecError::InvalidMagic(magic));
    }
    let version = r.u16()?;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let msg_type = r.u16()?;
    let flags = r.u16()?;
    let _reserved = r.u16()?;
    let session_id = r.id()?;
    let sequence = r.u64()?;
    let payload_len = r.u32()?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(payload_len));
    }
    Ok(FrameHeader {
        version,
        msg_type,
        flags,
        session_id,
        sequence,
        payload_len,
    })
}

fn crc32(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{Hello, Ping};
    use uuid::Uuid;

    fn encode(session: &SessionId, seq: u64, msg: &Message) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_frame(&mut buf, session, seq, msg);
        buf
    }

    #[test]
    fn frame_roundtrips_header_and_message() {
        let session = Uuid::new_v4();
        let msg = Message::Hello(Hello {
            client_name: "c1".to_string(),
        });
        let buf = encode(&session, 7, &msg);

        let (frame, consumed) = decode_frame(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(frame.session_id(), session);
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.message().unwrap(), Some(msg));
    }

    #[test]
    fn read_frame_consumes_exactly_one_frame_from_a_stream() {
        let session = Uuid::new_v4();
        let mut buf = encode(&session, 1, &Message::Ping(Ping { timestamp: 99 }));
        buf.extend_from_slice(&encode(&session, 2, &Message::Ping(Ping { timestamp: 100 })));

        let mut cursor = std::io::Cursor::new(buf);
        let first = read_frame(&mut cursor).unwrap();
        let second = read_frame(&mut cursor).unwrap();
        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let session = Uuid::nil();
        let mut buf = encode(&session, 0, &Message::Ping(Ping { timestamp: 0 }));
        buf[0] ^= 0xff;
        assert!(matches!(
            decode_frame(&buf),
            Err(CodecError::InvalidMagic(_))
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let session = Uuid::nil();
        let mut buf = encode(&session, 0, &Message::Ping(Ping { timestamp: 0 }));
        buf[4] = 0x7f;
        assert!(matches!(
            decode_frame(&buf),
            Err(CodecError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn tampered_payload_byte_fails_the_checksum() {
        let session = Uuid::nil();
        let msg = Message::Hello(Hello {
            client_name: "tamper-me".to_string(),
        });
        let mut buf = encode(&session, 0, &msg);
        // Flip a byte inside the payload region, past the 40-byte header.
        buf[HEADER_LEN + 5] ^= 0x01;
        assert!(matches!(
            decode_frame(&buf),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_stream_reports_truncation() {
        let session = Uuid::nil();
        let buf = encode(&session, 0, &Message::Ping(Ping { timestamp: 5 }));
        assert!(matches!(
            decode_frame(&buf[..buf.len() - 3]),
            Err(CodecError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn oversized_payload_length_is_rejected_before_allocation() {
        let session = Uuid::nil();
        let mut buf = encode(&session, 0, &Message::Ping(Ping { timestamp: 5 }));
        // payload_len lives at offset 36.
        buf[36..40].copy_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        assert!(matches!(
            decode_frame(&buf),
            Err(CodecError::PayloadTooLarge(_))
        ));
    }
}
