//! Boundary to a hypervisor node's control API

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use vg_protocol::Upid;

use crate::error::VgError;
use crate::model::{
    ConsoleAuth, ConsoleTicket, StorageInfo, Task, TaskFilter, TaskLogLine, TaskRequest,
    TaskStatus, UploadRequest,
};
use crate::types::{ConsoleKind, ConsoleTarget, NodeName};

/// Body of an upload or download
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// A volume being read from a node
pub struct Download {
    /// Size in bytes, when the node reports it
    pub size: Option<u64>,
    /// Volume contents
    pub body: ByteStream,
}

/// One hypervisor node
///
/// Every method is a single remote call. Implementations hold no task state
/// of their own; whatever they return is what the node reported.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Name of the node this client talks to
    fn node_name(&self) -> &NodeName;

    /// Start a mutating operation, returning the node-issued UPID
    async fn submit(&self, request: &TaskRequest) -> Result<Upid, VgError>;

    /// Current status of an operation
    async fn task_status(&self, upid: &Upid) -> Result<TaskStatus, VgError>;

    /// Log lines with index >= `start`, at most `limit`
    async fn task_log(&self, upid: &Upid, start: u64, limit: u64)
        -> Result<Vec<TaskLogLine>, VgError>;

    /// Operations known to this node
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, VgError>;

    /// Ask the node to stop an operation (advisory)
    async fn stop_task(&self, upid: &Upid) -> Result<(), VgError>;

    /// Storage metadata, including whether it is shared
    async fn storage_info(&self, storage: &str) -> Result<StorageInfo, VgError>;

    /// Stream a file into a storage
    ///
    /// Returns the UPID of the import task when the node runs one.
    async fn upload(&self, request: &UploadRequest, body: ByteStream)
        -> Result<Option<Upid>, VgError>;

    /// Read a volume back out of a storage
    async fn download(&self, volid: &str) -> Result<Download, VgError>;

    /// Open a console port
    ///
    /// `auth` carries caller-supplied primary authentication for terminal
    /// consoles; shell consoles use the node client's own credentials.
    async fn open_console(
        &self,
        target: &ConsoleTarget,
        kind: ConsoleKind,
        auth: Option<&ConsoleAuth>,
    ) -> Result<ConsoleTicket, VgError>;

    /// Current configuration of a guest
    ///
    /// Nodes echo their own fingerprint of the config under `digest`.
    async fn vm_config(&self, vmid: u32) -> Result<BTreeMap<String, Value>, VgError>;

    /// Apply a change set to a guest's configuration (`null` deletes a key)
    ///
    /// With `digest` set the node applies the change only while its config
    /// still carries that fingerprint, and answers `Conflict` otherwise.
    async fn update_vm_config(
        &self,
        vmid: u32,
        changes: &BTreeMap<String, Value>,
        digest: Option<&str>,
    ) -> Result<(), VgError>;
}
