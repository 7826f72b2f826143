//! Frame header encoding/decoding for the console tunnel handshake
//!
//! The frame format uses an 8-byte header:
//! - magic: 2 bytes (`b"VG"`)
//! - version: 2 bytes (u16, big-endian)
//! - message_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian)
//!
//! Only the handshake is framed. Once the server answers `Accepted` the
//! connection carries raw console bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Handshake payloads are tiny; anything larger is a confused or hostile peer
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// Leading bytes of every handshake frame
pub const MAGIC: [u8; 2] = *b"VG";

/// Current handshake version
pub const HANDSHAKE_VERSION: u16 = 1;

/// Frame header containing type and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Handshake version
    pub version: u16,
    /// Type of message in the payload
    pub message_type: MessageType,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header for the current handshake version
    pub fn new(message_type: MessageType, payload_length: u32) -> Self {
        Self {
            version: HANDSHAKE_VERSION,
            message_type,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_slice(&MAGIC);
        dst.put_u16(self.version);
        dst.put_u8(self.message_type.as_u8());
        // payload_length: 3 bytes big-endian (24-bit)
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (bad magic, version or type).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate before consuming anything
        if src[0..2] != MAGIC {
            return Err(ProtocolError::InvalidHeader);
        }
        let version = u16::from_be_bytes([src[2], src[3]]);
        if version != HANDSHAKE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let message_type =
            MessageType::from_u8(src[4]).ok_or(ProtocolError::UnknownMessageType(src[4]))?;

        src.advance(5);
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;
        let payload_length = (len_high << 16) | len_low;

        Ok(Some(Self {
            version,
            message_type,
            payload_length,
        }))
    }
}
