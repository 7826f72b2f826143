//! Unique process identifiers assigned by hypervisor nodes
//!
//! A UPID is opaque to the orchestration layer: it is stored and compared as
//! the exact string the node returned. Nodes do, however, encode a few useful
//! fields in it (`UPID:<node>:<pid>:<pstart>:<starttime>:<type>:<id>:<user>:`),
//! and these accessors read them when present so a status query that omits the
//! node name can still be routed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque task identifier issued by a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Upid(String);

impl Upid {
    /// Wrap a node-issued identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn field(&self, index: usize) -> Option<&str> {
        let mut parts = self.0.split(':');
        if parts.next() != Some("UPID") {
            return None;
        }
        parts.nth(index).filter(|s| !s.is_empty())
    }

    /// Node that issued the task, if the identifier is well formed
    pub fn node(&self) -> Option<&str> {
        self.field(0)
    }

    /// Task type such as `vzcreate`, `qmigrate`, `vzdump`
    pub fn task_type(&self) -> Option<&str> {
        self.field(4)
    }

    /// Task subject, usually a VM id
    pub fn subject(&self) -> Option<&str> {
        self.field(5)
    }

    /// User that started the task
    pub fn user(&self) -> Option<&str> {
        self.field(6)
    }

    /// Start time in Unix seconds (hex encoded in the identifier)
    pub fn start_time(&self) -> Option<u64> {
        self.field(3)
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
    }
}

impl fmt::Display for Upid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Upid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Upid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
