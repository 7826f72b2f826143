//! Tokio codec for the tunnel handshake

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::TunnelMessage;

/// Codec for encoding/decoding handshake frames
#[derive(Debug, Default)]
pub struct TunnelCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl TunnelCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for TunnelCodec {
    type Item = TunnelMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if src.len() < payload_len {
            self.pending_header = Some(header);
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let payload_bytes = src.split_to(payload_len).freeze();
        let message: TunnelMessage = bincode::deserialize(&payload_bytes)?;

        if message.message_type() != header.message_type {
            return Err(ProtocolError::TypeMismatch {
                header: header.message_type.as_u8(),
                payload: message.message_type().as_u8(),
            });
        }

        Ok(Some(message))
    }
}

impl Encoder<TunnelMessage> for TunnelCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: TunnelMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&message)?;
        let payload_len = payload.len();

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = FrameHeader::new(message.message_type(), payload_len as u32);
        header.encode(dst);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HEADER_SIZE;
    use crate::message::RejectReason;

    #[test]
    fn test_codec_hello() {
        let mut codec = TunnelCodec::new();
        let hello = TunnelMessage::Hello {
            token: "f00dfeed".to_string(),
        };

        let mut buf = BytesMut::new();
        codec.encode(hello.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, hello);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = TunnelCodec::new();
        let msg = TunnelMessage::Rejected {
            reason: RejectReason::Consumed,
        };

        let mut full_buf = BytesMut::new();
        codec.encode(msg.clone(), &mut full_buf).unwrap();

        // Header only, payload still in flight
        let mut partial = full_buf.split_to(HEADER_SIZE);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_codec_leaves_trailing_bytes() {
        // Raw console bytes pipelined right after the handshake must survive decoding
        let mut codec = TunnelCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                TunnelMessage::Accepted {
                    session_id: "s-1".into(),
                },
                &mut buf,
            )
            .unwrap();
        buf.extend_from_slice(b"RFB 003.008\n");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, TunnelMessage::Accepted { .. }));
        assert_eq!(&buf[..], b"RFB 003.008\n");
    }

    #[test]
    fn test_codec_rejects_oversized_length() {
        let mut codec = TunnelCodec::new();
        let header = FrameHeader::new(
            crate::message::MessageType::Hello,
            (MAX_PAYLOAD_SIZE + 1) as u32,
        );
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
