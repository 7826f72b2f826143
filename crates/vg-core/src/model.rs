//! Records exchanged with hypervisor nodes
//!
//! Node APIs return open-ended JSON objects. Each record here has the fields
//! the orchestrator relies on typed out, plus an `extra` map that keeps any
//! key we do not model so it can be passed through to clients untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use vg_protocol::Upid;

use crate::error::VgError;
use crate::types::{ChecksumAlgorithm, ContentClass};

/// Unrecognised keys of a remote record
pub type Extra = BTreeMap<String, Value>;

/// Nodes encode booleans as 0/1 integers
fn bool_from_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        Value::String(s) => Ok(matches!(s.as_str(), "1" | "true" | "yes")),
        Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean, got {}",
            other
        ))),
    }
}

/// One remote hypervisor operation, as listed by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Node-issued identifier
    pub upid: Upid,
    /// Issuing node
    pub node: String,
    /// Operation type (`qmcreate`, `qmigrate`, `vzdump`, ...)
    #[serde(rename = "type")]
    pub task_type: String,
    /// Subject of the operation, usually a VM id
    #[serde(default)]
    pub id: Option<String>,
    /// User that started the operation
    #[serde(default)]
    pub user: String,
    /// Free-form status text reported by the node
    #[serde(default)]
    pub status: Option<String>,
    /// Start time (Unix seconds)
    pub starttime: u64,
    /// End time (Unix seconds), once finished
    #[serde(default)]
    pub endtime: Option<u64>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Extra,
}

/// Current status of a remote operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Node-issued identifier
    pub upid: Upid,
    /// Issuing node
    #[serde(default)]
    pub node: String,
    /// `running` or `stopped`, as the node reports it
    pub status: String,
    /// Exit status once stopped (`OK`, `WARNINGS: n`, or an error message)
    #[serde(default)]
    pub exitstatus: Option<String>,
    /// Operation type
    #[serde(rename = "type", default)]
    pub task_type: String,
    /// Start time (Unix seconds)
    #[serde(default)]
    pub starttime: u64,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Extra,
}

impl TaskStatus {
    /// Whether the node still reports the operation as running
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// Whether the operation stopped with a success exit status
    pub fn succeeded(&self) -> bool {
        !self.is_running()
            && self
                .exitstatus
                .as_deref()
                .map(|s| s == "OK" || s.starts_with("WARNINGS"))
                .unwrap_or(false)
    }
}

/// One line of an operation's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogLine {
    /// Line index, strictly increasing and gapless
    pub n: u64,
    /// Line text
    pub t: String,
}

/// Keep the contiguous run of lines starting exactly at `start`
///
/// Sorts, drops duplicates and anything below `start`, and cuts at the first
/// gap. A node that returns lines out of order, repeats itself or skips ahead
/// can therefore never make a caller miss or see a line twice.
pub fn contiguous_from(mut lines: Vec<TaskLogLine>, start: u64, limit: usize) -> Vec<TaskLogLine> {
    lines.retain(|l| l.n >= start);
    lines.sort_by_key(|l| l.n);
    lines.dedup_by_key(|l| l.n);

    let mut expected = start;
    let mut out = Vec::with_capacity(lines.len().min(limit));
    for line in lines {
        if line.n != expected || out.len() >= limit {
            break;
        }
        expected += 1;
        out.push(line);
    }
    out
}

/// Caller-owned position in a task log
///
/// Holds the index of the next line to ask for. Feed every batch through
/// [`LogCursor::advance`] and pass [`LogCursor::next`] as the next `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    next: u64,
}

impl LogCursor {
    /// Cursor positioned at line `start`
    pub fn new(start: u64) -> Self {
        Self { next: start }
    }

    /// Index of the next line to request
    pub fn next(&self) -> u64 {
        self.next
    }

    /// Accept a batch, returning the lines not yet seen in order
    pub fn advance(&mut self, batch: Vec<TaskLogLine>) -> Vec<TaskLogLine> {
        let fresh = contiguous_from(batch, self.next, usize::MAX);
        if let Some(last) = fresh.last() {
            self.next = last.n + 1;
        }
        fresh
    }
}

/// Filter for task listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Only tasks of this type
    #[serde(default, rename = "typefilter", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Only tasks whose status text contains this
    #[serde(default, rename = "statusfilter", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Only tasks started at or after this time (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Maximum number of records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// Whether a task passes this filter
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(t) = &self.task_type {
            if &task.task_type != t {
                return false;
            }
        }
        if let Some(s) = &self.status {
            match &task.status {
                Some(status) if status.contains(s.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(since) = self.since {
            if task.starttime < since {
                return false;
            }
        }
        true
    }
}

/// Storage metadata as reported by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Storage name
    pub storage: String,
    /// Backend type (`dir`, `nfs`, `rbd`, ...)
    #[serde(rename = "type", default)]
    pub storage_type: String,
    /// Whether the same content is visible from every node
    #[serde(default, deserialize_with = "bool_from_int")]
    pub shared: bool,
    /// Comma separated content classes
    #[serde(default)]
    pub content: Option<String>,
    /// Available bytes
    #[serde(default)]
    pub avail: Option<u64>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Extra,
}

/// Console endpoint opened on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleTicket {
    /// Host the console port is reachable on
    #[serde(default)]
    pub host: String,
    /// Console port on the node
    pub port: u16,
    /// Console ticket
    pub ticket: String,
    /// Node certificate (PEM)
    #[serde(default)]
    pub cert: Option<String>,
    /// User the console runs as
    #[serde(default)]
    pub user: String,
    /// Task that serves the console
    #[serde(default)]
    pub upid: Option<Upid>,
}

/// Primary authentication a caller already holds for a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleAuth {
    /// Node API ticket
    pub ticket: String,
    /// CSRF prevention token paired with the ticket
    pub csrf_token: String,
}

/// A volume stored on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Volume id (`storage:content/file`)
    pub volid: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// Content class
    #[serde(default)]
    pub content: Option<String>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Extra,
}

/// Destination of an upload on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Storage name on the node
    pub storage: String,
    /// Content class
    pub content: ContentClass,
    /// File name on the storage
    pub filename: String,
    /// Declared size, when known
    #[serde(default)]
    pub size: Option<u64>,
    /// Checksum algorithm the node should verify with
    #[serde(default)]
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

impl UploadRequest {
    /// Volume id the upload will produce
    pub fn volume_id(&self) -> String {
        format!("{}:{}/{}", self.storage, self.content, self.filename)
    }

    /// Check fields before any bytes are sent
    pub fn validate(&self) -> Result<(), VgError> {
        if self.storage.trim().is_empty() {
            return Err(VgError::Validation("storage is required".into()));
        }
        if self.filename.trim().is_empty() {
            return Err(VgError::Validation("file name is required".into()));
        }
        if self.filename.contains('/') || self.filename.contains("..") {
            return Err(VgError::Validation(format!(
                "invalid file name '{}'",
                self.filename
            )));
        }
        Ok(())
    }
}

/// Split a volume id into `(storage, file name)`
pub fn split_volume_id(volid: &str) -> Option<(&str, &str)> {
    let (storage, rest) = volid.split_once(':')?;
    let file = rest.rsplit('/').next()?;
    if storage.is_empty() || file.is_empty() {
        return None;
    }
    Some((storage, file))
}

/// A mutating operation executed by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Create a guest
    VmCreate {
        vmid: u32,
        #[serde(default)]
        config: BTreeMap<String, Value>,
    },
    /// Start a guest
    VmStart { vmid: u32 },
    /// Hard-stop a guest
    VmStop { vmid: u32 },
    /// Gracefully shut a guest down
    VmShutdown { vmid: u32 },
    /// Destroy a guest
    VmDelete { vmid: u32 },
    /// Migrate a guest to another node
    VmMigrate {
        vmid: u32,
        target: String,
        #[serde(default)]
        online: bool,
    },
    /// Back a guest up
    VmBackup {
        vmid: u32,
        storage: String,
        #[serde(default)]
        compress: Option<String>,
        #[serde(default)]
        mode: Option<String>,
    },
    /// Restore a backup archive as a template
    RestoreTemplate {
        vmid: u32,
        archive: String,
        storage: String,
    },
    /// Wipe a physical disk
    DiskWipe { disk: String },
}

impl TaskRequest {
    /// Node task type this request produces
    pub fn task_type(&self) -> &'static str {
        match self {
            TaskRequest::VmCreate { .. } => "qmcreate",
            TaskRequest::VmStart { .. } => "qmstart",
            TaskRequest::VmStop { .. } => "qmstop",
            TaskRequest::VmShutdown { .. } => "qmshutdown",
            TaskRequest::VmDelete { .. } => "qmdestroy",
            TaskRequest::VmMigrate { .. } => "qmigrate",
            TaskRequest::VmBackup { .. } => "vzdump",
            TaskRequest::RestoreTemplate { .. } => "qmrestore",
            TaskRequest::DiskWipe { .. } => "wipedisk",
        }
    }

    /// Subject recorded in the UPID
    pub fn subject(&self) -> String {
        match self {
            TaskRequest::VmCreate { vmid, .. }
            | TaskRequest::VmStart { vmid }
            | TaskRequest::VmStop { vmid }
            | TaskRequest::VmShutdown { vmid }
            | TaskRequest::VmDelete { vmid }
            | TaskRequest::VmMigrate { vmid, .. }
            | TaskRequest::VmBackup { vmid, .. }
            | TaskRequest::RestoreTemplate { vmid, .. } => vmid.to_string(),
            TaskRequest::DiskWipe { disk } => disk.rsplit('/').next().unwrap_or(disk).to_string(),
        }
    }

    /// Reject malformed requests before they reach a node
    pub fn validate(&self) -> Result<(), VgError> {
        let vmid = match self {
            TaskRequest::DiskWipe { disk } => {
                if !disk.starts_with("/dev/") {
                    return Err(VgError::Validation(format!(
                        "disk must be a device path, got '{}'",
                        disk
                    )));
                }
                return Ok(());
            }
            TaskRequest::VmCreate { vmid, .. }
            | TaskRequest::VmStart { vmid }
            | TaskRequest::VmStop { vmid }
            | TaskRequest::VmShutdown { vmid }
            | TaskRequest::VmDelete { vmid }
            | TaskRequest::VmMigrate { vmid, .. }
            | TaskRequest::VmBackup { vmid, .. }
            | TaskRequest::RestoreTemplate { vmid, .. } => *vmid,
        };
        if vmid < 100 {
            return Err(VgError::Validation(format!(
                "vmid must be at least 100, got {}",
                vmid
            )));
        }
        match self {
            TaskRequest::VmMigrate { target, .. } if target.trim().is_empty() => Err(
                VgError::Validation("migration target node is required".into()),
            ),
            TaskRequest::VmBackup { storage, .. } if storage.trim().is_empty() => {
                Err(VgError::Validation("backup storage is required".into()))
            }
            TaskRequest::RestoreTemplate {
                archive, storage, ..
            } if archive.trim().is_empty() || storage.trim().is_empty() => Err(
                VgError::Validation("restore needs an archive and a target storage".into()),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_keeps_unknown_fields() {
        let json = r#"{
            "upid": "UPID:pve1:00001234:00ABCDEF:65A0B1C2:vzdump:100:root@pam:",
            "node": "pve1",
            "type": "vzdump",
            "id": "100",
            "user": "root@pam",
            "status": "OK",
            "starttime": 1705030082,
            "endtime": 1705030100,
            "pstart": 11259375,
            "saved": "1"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.task_type, "vzdump");
        assert_eq!(task.extra.get("pstart"), Some(&Value::from(11259375)));
        assert_eq!(task.extra.len(), 2);

        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(back["saved"], "1");
    }

    #[test]
    fn test_task_status_success_vocabulary() {
        let mut status: TaskStatus = serde_json::from_str(
            r#"{"upid":"UPID:a:1:2:3:qmstart:100:root@pam:","status":"running"}"#,
        )
        .unwrap();
        assert!(status.is_running());
        assert!(!status.succeeded());

        status.status = "stopped".into();
        status.exitstatus = Some("WARNINGS: 2".into());
        assert!(status.succeeded());

        status.exitstatus = Some("command 'qm start' failed".into());
        assert!(!status.succeeded());
    }

    #[test]
    fn test_storage_shared_flag_from_int() {
        let info: StorageInfo =
            serde_json::from_str(r#"{"storage":"ceph","type":"rbd","shared":1}"#).unwrap();
        assert!(info.shared);
        let info: StorageInfo = serde_json::from_str(r#"{"storage":"local"}"#).unwrap();
        assert!(!info.shared);
    }

    fn lines(ns: &[u64]) -> Vec<TaskLogLine> {
        ns.iter()
            .map(|n| TaskLogLine {
                n: *n,
                t: format!("line {}", n),
            })
            .collect()
    }

    fn indices(lines: &[TaskLogLine]) -> Vec<u64> {
        lines.iter().map(|l| l.n).collect()
    }

    #[test]
    fn test_contiguous_from_trims_gaps_and_duplicates() {
        let out = contiguous_from(lines(&[5, 3, 4, 4, 2, 7]), 3, 10);
        assert_eq!(indices(&out), vec![3, 4, 5]);

        let out = contiguous_from(lines(&[4, 5]), 3, 10);
        assert!(out.is_empty());

        let out = contiguous_from(lines(&[0, 1, 2, 3]), 0, 2);
        assert_eq!(indices(&out), vec![0, 1]);
    }

    #[test]
    fn test_log_cursor_never_repeats() {
        let mut cursor = LogCursor::new(0);
        let first = cursor.advance(lines(&[0, 1, 2]));
        assert_eq!(indices(&first), vec![0, 1, 2]);
        assert_eq!(cursor.next(), 3);

        // Overlapping batch from a racing fetch
        let second = cursor.advance(lines(&[2, 3, 4]));
        assert_eq!(indices(&second), vec![3, 4]);

        let third = cursor.advance(Vec::new());
        assert!(third.is_empty());
        assert_eq!(cursor.next(), 5);
    }

    #[test]
    fn test_task_filter() {
        let task: Task = serde_json::from_str(
            r#"{"upid":"u","node":"n","type":"qmigrate","status":"OK","starttime":50}"#,
        )
        .unwrap();
        assert!(TaskFilter::default().matches(&task));
        let filter = TaskFilter {
            task_type: Some("qmigrate".into()),
            since: Some(40),
            ..Default::default()
        };
        assert!(filter.matches(&task));
        let filter = TaskFilter {
            since: Some(60),
            ..Default::default()
        };
        assert!(!filter.matches(&task));
    }

    #[test]
    fn test_task_request_validation() {
        assert!(TaskRequest::VmStart { vmid: 100 }.validate().is_ok());
        assert!(matches!(
            TaskRequest::VmStart { vmid: 7 }.validate(),
            Err(VgError::Validation(_))
        ));
        let migrate = TaskRequest::VmMigrate {
            vmid: 101,
            target: " ".into(),
            online: true,
        };
        assert!(migrate.validate().is_err());
        assert!(TaskRequest::DiskWipe {
            disk: "/dev/sdb".into()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_task_request_tagging() {
        let req: TaskRequest =
            serde_json::from_str(r#"{"op":"vm_backup","vmid":120,"storage":"nas"}"#).unwrap();
        assert_eq!(req.task_type(), "vzdump");
        assert_eq!(req.subject(), "120");
    }

    #[test]
    fn test_volume_ids() {
        let req = UploadRequest {
            storage: "local".into(),
            content: ContentClass::Iso,
            filename: "debian-12.iso".into(),
            size: None,
            checksum_algorithm: None,
        };
        assert_eq!(req.volume_id(), "local:iso/debian-12.iso");
        assert_eq!(
            split_volume_id("local:iso/debian-12.iso"),
            Some(("local", "debian-12.iso"))
        );
        assert_eq!(split_volume_id("nocolon"), None);

        let bad = UploadRequest {
            filename: "../etc/passwd".into(),
            ..req
        };
        assert!(bad.validate().is_err());
    }
}
