//! vg-core: Core abstractions and configuration for vmgate
//!
//! This crate provides the domain types, remote records, error taxonomy,
//! configuration structures and the `NodeApi` boundary shared by the
//! orchestrator daemon and the CLI.

pub mod api_token;
pub mod auth;
pub mod config;
pub mod digest;
pub mod error;
pub mod model;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, VgError};
pub use types::{
    ChecksumAlgorithm, ClusterId, ConsoleKind, ConsoleTarget, ContentClass, NodeName,
    SyncStatus, SyncTaskId, TaskKey, TemplateId,
};
pub use vg_protocol::Upid;
