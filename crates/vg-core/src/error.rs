//! Core error types for vmgate

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vg_protocol::ProtocolError;

use crate::types::SyncStatus;

/// Top-level error type for the orchestration layer
///
/// Guard errors (`Validation`, `Conflict`, `NotRetryable`, `Superseded`, token errors) are
/// final answers and must never be retried automatically. Use
/// [`VgError::is_transient`] to decide whether backing off and trying again
/// makes sense.
#[derive(Error, Debug)]
pub enum VgError {
    /// Malformed or missing input, rejected before any remote call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Upstream node rejected or failed the operation
    #[error("Remote API error{}: {message}", .code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    RemoteApi {
        /// Upstream status code, when one was reported
        code: Option<u16>,
        /// Upstream message, verbatim
        message: String,
    },

    /// Config digest no longer matches (concurrent editor)
    #[error("Conflict on {resource}: expected digest {expected}, current is {current}")]
    Conflict {
        /// Resource the write targeted
        resource: String,
        /// Digest the caller supplied
        expected: String,
        /// Digest of the current state
        current: String,
    },

    /// `retry` on a sync task that is not `failed`
    #[error("Sync task {task_id} is {status} and cannot be retried")]
    NotRetryable {
        /// Sync task id
        task_id: String,
        /// Status observed when the retry was refused
        status: SyncStatus,
    },

    /// `retry` on a failed sync task whose edge already has a newer task
    #[error("Sync task {task_id} was replaced by task {by} and cannot be retried")]
    Superseded {
        /// Sync task id
        task_id: String,
        /// Task now responsible for the same template and target
        by: String,
    },

    /// Console token presented after its expiry
    #[error("Console token for session {session_id} has expired")]
    TokenExpired {
        /// Session that issued the token
        session_id: String,
    },

    /// Console token presented a second time
    #[error("Console token for session {session_id} was already consumed")]
    TokenConsumed {
        /// Session that issued the token
        session_id: String,
    },

    /// Console token that was never issued or has been pruned
    #[error("Unknown console token")]
    UnknownToken,

    /// Deadline exceeded
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Deadline that was exceeded
        after: Duration,
    },

    /// Entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or decoding failure talking to a node
    #[error("Transport error: {0}")]
    Transport(String),

    /// No usable credentials
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VgError {
    /// Build a remote error without a status code
    pub fn remote(message: impl Into<String>) -> Self {
        VgError::RemoteApi {
            code: None,
            message: message.into(),
        }
    }

    /// Whether a caller may retry the same call after backing off
    pub fn is_transient(&self) -> bool {
        match self {
            VgError::Transport(_) | VgError::Timeout { .. } | VgError::Io(_) => true,
            VgError::RemoteApi { code: Some(code), .. } => *code >= 500,
            _ => false,
        }
    }
}

impl From<ProtocolError> for VgError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Remote { code, message } => VgError::RemoteApi {
                code: Some(code),
                message,
            },
            ProtocolError::Io(e) => VgError::Io(e),
            other => VgError::Transport(other.to_string()),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Unknown cluster or node referenced
    #[error("Unknown {kind}: {name}")]
    Unknown {
        /// "cluster", "node" or "storage"
        kind: &'static str,
        /// Offending identifier
        name: String,
    },
}
