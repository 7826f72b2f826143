//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding wire data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame header did not start with the tunnel magic
    #[error("Invalid frame header")]
    InvalidHeader,

    /// Peer speaks a handshake version we do not understand
    #[error("Unsupported handshake version: {0}")]
    UnsupportedVersion(u16),

    /// Unknown message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Frame header and decoded payload disagree on the message type
    #[error("Message type mismatch: header says {header}, payload is {payload}")]
    TypeMismatch { header: u8, payload: u8 },

    /// Response body could not be interpreted as any known envelope
    #[error("Malformed response envelope: {0}")]
    Envelope(String),

    /// The remote side answered with an explicit failure
    #[error("Remote API error ({code}): {message}")]
    Remote { code: u16, message: String },

    /// Binary serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
