//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vg_protocol::Upid;

use crate::error::VgError;

/// Numeric cluster identifier, as configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a hypervisor node within a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(pub String);

impl NodeName {
    /// Create a new node name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of one remote operation
///
/// The UPID alone is not a key: only the node that issued it can report on it,
/// so every query routes through the full triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Cluster the node belongs to
    pub cluster_id: ClusterId,
    /// Node that issued the UPID
    pub node_name: NodeName,
    /// Node-issued identifier
    pub upid: Upid,
}

impl TaskKey {
    /// Create a new task key
    pub fn new(cluster_id: ClusterId, node_name: impl Into<NodeName>, upid: impl Into<Upid>) -> Self {
        Self {
            cluster_id,
            node_name: node_name.into(),
            upid: upid.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster_id, self.node_name, self.upid)
    }
}

/// Identifier of a template in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub u64);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one node-to-node distribution edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncTaskId(pub u64);

impl fmt::Display for SyncTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a template sync task
///
/// This is a closed vocabulary owned by the orchestrator. It is deliberately
/// distinct from the free-text status of remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SyncStatus {
    /// Created, work not started
    Pending = 0,
    /// Copy in progress
    Syncing = 1,
    /// Copy finished (terminal)
    Completed = 2,
    /// Copy failed, may be retried
    Failed = 3,
}

impl SyncStatus {
    /// Convert to u8 for atomic storage
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Syncing),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether work is queued or running
    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Syncing)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = VgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(VgError::Validation(format!("unknown sync status '{}'", other))),
        }
    }
}

/// Kind of console session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleKind {
    /// Graphical shell; the broker obtains its own node ticket
    #[serde(alias = "vncshell")]
    Shell,
    /// Text terminal; the caller supplies an existing ticket and CSRF token
    #[serde(alias = "termproxy")]
    Terminal,
}

impl ConsoleKind {
    /// Node API endpoint that opens this kind of console
    pub fn endpoint(&self) -> &'static str {
        match self {
            ConsoleKind::Shell => "vncshell",
            ConsoleKind::Terminal => "termproxy",
        }
    }
}

impl fmt::Display for ConsoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleKind::Shell => write!(f, "shell"),
            ConsoleKind::Terminal => write!(f, "terminal"),
        }
    }
}

impl FromStr for ConsoleKind {
    type Err = VgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shell" | "vncshell" => Ok(ConsoleKind::Shell),
            "terminal" | "termproxy" => Ok(ConsoleKind::Terminal),
            other => Err(VgError::Validation(format!("unknown console kind '{}'", other))),
        }
    }
}

/// What a console session attaches to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "lowercase")]
pub enum ConsoleTarget {
    /// The node's host shell
    Node,
    /// A guest's console
    Vm {
        /// Guest id
        vmid: u32,
    },
}

impl fmt::Display for ConsoleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleTarget::Node => write!(f, "node"),
            ConsoleTarget::Vm { vmid } => write!(f, "vm/{}", vmid),
        }
    }
}

/// Storage content class of an uploaded volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    /// Installation media
    Iso,
    /// Container templates
    Vztmpl,
    /// Disk images
    Images,
    /// Backup archives
    Backup,
    /// Snippets (hook scripts, cloud-init)
    Snippets,
}

impl ContentClass {
    /// Storage sub-directory name used in volume ids
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Iso => "iso",
            ContentClass::Vztmpl => "vztmpl",
            ContentClass::Images => "images",
            ContentClass::Backup => "backup",
            ContentClass::Snippets => "snippets",
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentClass {
    type Err = VgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iso" => Ok(ContentClass::Iso),
            "vztmpl" => Ok(ContentClass::Vztmpl),
            "images" => Ok(ContentClass::Images),
            "backup" => Ok(ContentClass::Backup),
            "snippets" => Ok(ContentClass::Snippets),
            other => Err(VgError::Validation(format!("unknown content class '{}'", other))),
        }
    }
}

/// Checksum algorithm a node should verify an upload with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha224 => "sha224",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = VgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha224" => Ok(ChecksumAlgorithm::Sha224),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(VgError::Validation(format!(
                "unsupported checksum algorithm '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_u8_mapping() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Completed,
            SyncStatus::Failed,
        ] {
            assert_eq!(SyncStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(SyncStatus::from_u8(9), None);
    }

    #[test]
    fn test_sync_status_serde_lowercase() {
        let json = serde_json::to_string(&SyncStatus::Syncing).unwrap();
        assert_eq!(json, "\"syncing\"");
        assert_eq!("FAILED".parse::<SyncStatus>().unwrap(), SyncStatus::Failed);
        assert!("running".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_console_kind_aliases() {
        let kind: ConsoleKind = serde_json::from_str("\"termproxy\"").unwrap();
        assert_eq!(kind, ConsoleKind::Terminal);
        assert_eq!("vncshell".parse::<ConsoleKind>().unwrap(), ConsoleKind::Shell);
        assert_eq!(ConsoleKind::Terminal.endpoint(), "termproxy");
    }

    #[test]
    fn test_console_target_tagging() {
        let target: ConsoleTarget = serde_json::from_str(r#"{"target":"vm","vmid":101}"#).unwrap();
        assert_eq!(target, ConsoleTarget::Vm { vmid: 101 });
        assert_eq!(target.to_string(), "vm/101");
    }

    #[test]
    fn test_task_key_display() {
        let key = TaskKey::new(ClusterId(2), "pve1", "UPID:pve1:1:2:3:qmstart:100:root@pam:");
        assert_eq!(key.to_string(), "2/pve1/UPID:pve1:1:2:3:qmstart:100:root@pam:");
    }

    #[test]
    fn test_content_and_checksum_parsing() {
        assert_eq!("ISO".parse::<ContentClass>().unwrap(), ContentClass::Iso);
        assert!("rootdir".parse::<ContentClass>().is_err());
        assert_eq!(
            "sha256".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha256
        );
    }
}
