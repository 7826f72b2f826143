//! Console tunnel handshake messages
//!
//! # Message Flow
//!
//! 1. Client connects to the tunnel listener and sends `Hello` with the
//!    single-use token it received from `createSession`
//! 2. Orchestrator consumes the token and answers `Accepted`, or answers
//!    `Rejected` and closes the connection
//! 3. After `Accepted` the connection is a transparent byte relay to the
//!    node's console port until either side closes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client presents a token
    Hello = 0x01,
    /// Token consumed, relay begins
    Accepted = 0x02,
    /// Token refused, connection will close
    Rejected = 0x03,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Accepted),
            0x03 => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Why a tunnel upgrade was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Token's expiry has passed
    Expired,
    /// Token was already used by an earlier connection
    Consumed,
    /// Token was never issued (or has been pruned)
    Unknown,
    /// Token was valid and consumed, but the node console could not be reached
    UpstreamUnavailable,
    /// Client did not open with a well-formed `Hello`
    Malformed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Expired => write!(f, "token expired"),
            RejectReason::Consumed => write!(f, "token already consumed"),
            RejectReason::Unknown => write!(f, "unknown token"),
            RejectReason::UpstreamUnavailable => write!(f, "console upstream unavailable"),
            RejectReason::Malformed => write!(f, "malformed handshake"),
        }
    }
}

/// Handshake message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelMessage {
    /// Client opens the tunnel
    Hello {
        /// Single-use token from the console session grant
        token: String,
    },

    /// Token accepted; everything after this frame is raw console traffic
    Accepted {
        /// Console session the token belonged to
        session_id: String,
    },

    /// Token refused
    Rejected {
        /// Reason for refusal
        reason: RejectReason,
    },
}

impl TunnelMessage {
    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            TunnelMessage::Hello { .. } => MessageType::Hello,
            TunnelMessage::Accepted { .. } => MessageType::Accepted,
            TunnelMessage::Rejected { .. } => MessageType::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_from_u8() {
        assert_eq!(MessageType::from_u8(0x01), Some(MessageType::Hello));
        assert_eq!(MessageType::from_u8(0x03), Some(MessageType::Rejected));
        assert_eq!(MessageType::from_u8(0x42), None);
    }

    #[test]
    fn test_message_type_of_message() {
        let hello = TunnelMessage::Hello {
            token: "abc".into(),
        };
        assert_eq!(hello.message_type(), MessageType::Hello);

        let rejected = TunnelMessage::Rejected {
            reason: RejectReason::Expired,
        };
        assert_eq!(rejected.message_type(), MessageType::Rejected);
    }

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(RejectReason::Consumed.to_string(), "token already consumed");
        assert_eq!(RejectReason::Expired.to_string(), "token expired");
    }
}
