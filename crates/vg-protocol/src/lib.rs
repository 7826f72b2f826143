//! vg-protocol: Wire contracts for vmgate
//!
//! This crate holds everything that crosses a process boundary:
//! the adapter that normalises the divergent JSON response envelopes of
//! node and orchestrator APIs, the UPID task identifier, and the binary
//! handshake spoken on the console tunnel listener.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod message;
pub mod upid;

pub use codec::TunnelCodec;
pub use envelope::{parse_list_response, parse_response, unwrap_envelope, ApiEnvelope, ListPage};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{MessageType, RejectReason, TunnelMessage};
pub use upid::Upid;
