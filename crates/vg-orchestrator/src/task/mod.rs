//! Remote operation tracking
//!
//! The registry only remembers which node issued which UPID. Status and logs
//! are always read from the node, so a failed poll can leave a caller with a
//! stale answer but never with corrupted state.

mod registry;
mod tail;

pub use registry::TaskRegistry;
pub use tail::LogTail;
