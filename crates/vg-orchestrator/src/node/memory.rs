//! Simulated hypervisor node
//!
//! Backs `backend = "memory"` clusters for local development and drives the
//! integration tests. Tasks run on a timer and write their log a line at a
//! time, storages can be local or shared, and uploads can be made to fail or
//! stall on demand.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::{json, Value};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use vg_core::digest::{apply_changes, config_digest, DIGEST_KEY};
use vg_core::model::{
    split_volume_id, ConsoleAuth, ConsoleTicket, StorageInfo, Task, TaskFilter, TaskLogLine,
    TaskRequest, TaskStatus, UploadRequest,
};
use vg_core::time::current_time_secs;
use vg_core::traits::{ByteStream, Download, NodeApi};
use vg_core::{ChecksumAlgorithm, ConsoleKind, ConsoleTarget, NodeName, Upid, VgError};

const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Volumes on shared storages, visible from every node of a cluster
#[derive(Debug, Default)]
pub struct SharedStorage {
    volumes: DashMap<String, Bytes>,
}

struct SimTask {
    task: Task,
    status: TaskStatus,
    log: Vec<String>,
    stop_requested: bool,
}

#[derive(Default)]
struct NodeSim {
    tasks: BTreeMap<Upid, SimTask>,
    storages: HashMap<String, StorageInfo>,
    volumes: HashMap<String, Bytes>,
    vm_configs: HashMap<u32, BTreeMap<String, Value>>,
}

struct Faults {
    task_duration: Option<Duration>,
    upload_error: Option<String>,
    upload_delay: Duration,
    console_upstream: Option<SocketAddr>,
    status_failures: u32,
    pending_edit: Option<(String, Value)>,
}

/// An in-process node
pub struct InMemoryNode {
    name: NodeName,
    sim: Arc<Mutex<NodeSim>>,
    shared: Arc<SharedStorage>,
    faults: Mutex<Faults>,
    pid: AtomicU32,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The node's own config fingerprint, shorter than the one clients see
fn node_digest(config: &BTreeMap<String, Value>) -> String {
    let mut digest = config_digest(config);
    digest.truncate(40);
    digest
}

fn node_error(message: impl Into<String>) -> VgError {
    VgError::RemoteApi {
        code: Some(500),
        message: message.into(),
    }
}

impl InMemoryNode {
    /// A standalone node with a local `local` storage
    pub fn new(name: &str) -> Self {
        Self::in_cluster(name, Arc::new(SharedStorage::default()))
    }

    /// A node whose shared storages live in `shared`
    pub fn in_cluster(name: &str, shared: Arc<SharedStorage>) -> Self {
        let node = Self {
            name: NodeName::new(name),
            sim: Arc::new(Mutex::new(NodeSim::default())),
            shared,
            faults: Mutex::new(Faults {
                task_duration: Some(Duration::from_millis(30)),
                upload_error: None,
                upload_delay: Duration::ZERO,
                console_upstream: None,
                status_failures: 0,
                pending_edit: None,
            }),
            pid: AtomicU32::new(0x1000),
        };
        node.add_storage("local", false);
        node
    }

    /// Add or replace a storage
    pub fn add_storage(&self, name: &str, shared: bool) {
        let info = StorageInfo {
            storage: name.to_string(),
            storage_type: if shared { "nfs" } else { "dir" }.to_string(),
            shared,
            content: Some("iso,vztmpl,images,backup,snippets".to_string()),
            avail: Some(1 << 40),
            extra: BTreeMap::new(),
        };
        lock(&self.sim).storages.insert(name.to_string(), info);
    }

    /// How long tasks run; `None` keeps them running until [`finish_task`](Self::finish_task)
    pub fn set_task_duration(&self, duration: Option<Duration>) {
        lock(&self.faults).task_duration = duration;
    }

    /// Make every upload fail with this message (after the body is read)
    pub fn set_upload_fault(&self, message: Option<&str>) {
        lock(&self.faults).upload_error = message.map(str::to_string);
    }

    /// Stall every upload before reading the body
    pub fn set_upload_delay(&self, delay: Duration) {
        lock(&self.faults).upload_delay = delay;
    }

    /// Make the next `count` task status reads fail as if the connection dropped
    pub fn fail_status_polls(&self, count: u32) {
        lock(&self.faults).status_failures = count;
    }

    /// Have another editor set `key` on a guest just before the next config write lands
    pub fn edit_before_next_write(&self, key: &str, value: Value) {
        lock(&self.faults).pending_edit = Some((key.to_string(), value));
    }

    /// Where console ports of this node actually listen
    pub fn set_console_upstream(&self, addr: SocketAddr) {
        lock(&self.faults).console_upstream = Some(addr);
    }

    /// Install a guest configuration
    pub fn set_vm_config(&self, vmid: u32, config: BTreeMap<String, Value>) {
        lock(&self.sim).vm_configs.insert(vmid, config);
    }

    /// Store a volume directly
    pub fn put_volume(&self, volid: &str, data: Bytes) {
        let shared = self.is_shared_volume(volid);
        if shared {
            self.shared.volumes.insert(volid.to_string(), data);
        } else {
            lock(&self.sim).volumes.insert(volid.to_string(), data);
        }
    }

    /// Contents of a volume, if present
    pub fn volume(&self, volid: &str) -> Option<Bytes> {
        if self.is_shared_volume(volid) {
            return self.shared.volumes.get(volid).map(|v| v.clone());
        }
        lock(&self.sim).volumes.get(volid).cloned()
    }

    /// Append a line to a task's log
    pub fn append_log(&self, upid: &Upid, line: &str) {
        if let Some(task) = lock(&self.sim).tasks.get_mut(upid) {
            task.log.push(line.to_string());
        }
    }

    /// Stop a running task with the given outcome
    pub fn finish_task(&self, upid: &Upid, outcome: Result<(), String>) {
        finish(&self.sim, upid, outcome);
    }

    /// Number of tasks the node has run
    pub fn task_count(&self) -> usize {
        lock(&self.sim).tasks.len()
    }

    fn is_shared_volume(&self, volid: &str) -> bool {
        split_volume_id(volid)
            .and_then(|(storage, _)| lock(&self.sim).storages.get(storage).map(|s| s.shared))
            .unwrap_or(false)
    }

    fn has_storage(&self, storage: &str) -> Result<(), VgError> {
        if lock(&self.sim).storages.contains_key(storage) {
            Ok(())
        } else {
            Err(node_error(format!("storage '{}' does not exist", storage)))
        }
    }

    fn next_upid(&self, task_type: &str, subject: &str) -> (Upid, u64) {
        let pid = self.pid.fetch_add(1, Ordering::SeqCst);
        let now = current_time_secs();
        let upid = Upid::new(format!(
            "UPID:{}:{:08X}:{:08X}:{:08X}:{}:{}:root@pam:",
            self.name, pid, pid, now, task_type, subject
        ));
        (upid, now)
    }

    /// Register a running task and let it play out
    fn start_task(
        &self,
        task_type: &str,
        subject: &str,
        steps: Vec<String>,
        outcome: Result<(), String>,
    ) -> Upid {
        let (upid, now) = self.next_upid(task_type, subject);
        let task = Task {
            upid: upid.clone(),
            node: self.name.to_string(),
            task_type: task_type.to_string(),
            id: Some(subject.to_string()),
            user: "root@pam".to_string(),
            status: None,
            starttime: now,
            endtime: None,
            extra: BTreeMap::new(),
        };
        let status = TaskStatus {
            upid: upid.clone(),
            node: self.name.to_string(),
            status: "running".to_string(),
            exitstatus: None,
            task_type: task_type.to_string(),
            starttime: now,
            extra: BTreeMap::new(),
        };
        lock(&self.sim).tasks.insert(
            upid.clone(),
            SimTask {
                task,
                status,
                log: vec![format!("starting {} {}", task_type, subject)],
                stop_requested: false,
            },
        );

        let duration = lock(&self.faults).task_duration;
        match duration {
            None => {
                for step in steps {
                    self.append_log(&upid, &step);
                }
            }
            Some(d) if d.is_zero() => {
                for step in steps {
                    self.append_log(&upid, &step);
                }
                finish(&self.sim, &upid, outcome);
            }
            Some(d) => {
                let sim = Arc::clone(&self.sim);
                let id = upid.clone();
                let tick = d / (steps.len() as u32 + 1);
                tokio::spawn(async move {
                    for step in steps {
                        tokio::time::sleep(tick).await;
                        let mut guard = lock(&sim);
                        let Some(task) = guard.tasks.get_mut(&id) else {
                            return;
                        };
                        if task.stop_requested {
                            drop(guard);
                            finish(&sim, &id, Err("interrupted by signal".into()));
                            return;
                        }
                        task.log.push(step);
                    }
                    tokio::time::sleep(tick).await;
                    finish(&sim, &id, outcome);
                });
            }
        }
        upid
    }
}

fn finish(sim: &Mutex<NodeSim>, upid: &Upid, outcome: Result<(), String>) {
    let mut guard = lock(sim);
    let Some(task) = guard.tasks.get_mut(upid) else {
        return;
    };
    if task.status.status != "running" {
        return;
    }
    let exit = match outcome {
        Ok(()) => {
            task.log.push("TASK OK".to_string());
            "OK".to_string()
        }
        Err(msg) => {
            task.log.push(format!("TASK ERROR: {}", msg));
            msg
        }
    };
    let now = current_time_secs();
    task.status.status = "stopped".to_string();
    task.status.exitstatus = Some(exit.clone());
    task.status
        .extra
        .insert("endtime".to_string(), Value::from(now));
    task.task.status = Some(exit);
    task.task.endtime = Some(now);
}

fn checksum_line(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let digest = match algorithm {
        ChecksumAlgorithm::Sha224 => hex::encode(Sha224::digest(data)),
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        ChecksumAlgorithm::Sha384 => hex::encode(Sha384::digest(data)),
        ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
        ChecksumAlgorithm::Md5 | ChecksumAlgorithm::Sha1 => {
            return format!("checksum algorithm {} not verified", algorithm)
        }
    };
    format!("{} checksum {}", algorithm, digest)
}

#[async_trait]
impl NodeApi for InMemoryNode {
    fn node_name(&self) -> &NodeName {
        &self.name
    }

    async fn submit(&self, request: &TaskRequest) -> Result<Upid, VgError> {
        let task_type = request.task_type();
        let subject = request.subject();
        let (steps, outcome) = match request {
            TaskRequest::VmCreate { vmid, config } => {
                let mut sim = lock(&self.sim);
                if sim.vm_configs.contains_key(vmid) {
                    return Err(node_error(format!(
                        "unable to create VM {} - VM {} already exists on node '{}'",
                        vmid, vmid, self.name
                    )));
                }
                sim.vm_configs.insert(*vmid, config.clone());
                (vec![format!("created VM {}", vmid)], Ok(()))
            }
            TaskRequest::VmStart { vmid }
            | TaskRequest::VmStop { vmid }
            | TaskRequest::VmShutdown { vmid } => {
                if !lock(&self.sim).vm_configs.contains_key(vmid) {
                    return Err(node_error(format!(
                        "Configuration file 'nodes/{}/qemu-server/{}.conf' does not exist",
                        self.name, vmid
                    )));
                }
                (Vec::new(), Ok(()))
            }
            TaskRequest::VmDelete { vmid } => {
                lock(&self.sim).vm_configs.remove(vmid);
                (vec![format!("destroyed VM {}", vmid)], Ok(()))
            }
            TaskRequest::VmMigrate { vmid, target, .. } => {
                if target.as_str() == self.name.as_str() {
                    return Err(node_error("target node is local node"));
                }
                (
                    vec![
                        format!("starting migration of VM {} to node '{}'", vmid, target),
                        "migration finished successfully".to_string(),
                    ],
                    Ok(()),
                )
            }
            TaskRequest::VmBackup { vmid, storage, .. } => {
                self.has_storage(storage)?;
                let config = lock(&self.sim).vm_configs.get(vmid).cloned();
                let Some(config) = config else {
                    return Err(node_error(format!("VM {} does not exist", vmid)));
                };
                let volid = format!(
                    "{}:backup/vzdump-qemu-{}-{}.vma.zst",
                    storage,
                    vmid,
                    current_time_secs()
                );
                self.put_volume(&volid, Bytes::from(json!(config).to_string()));
                (vec![format!("creating archive '{}'", volid)], Ok(()))
            }
            TaskRequest::RestoreTemplate {
                vmid,
                archive,
                storage,
            } => {
                self.has_storage(storage)?;
                let outcome = if lock(&self.sim).vm_configs.contains_key(vmid) {
                    Err(format!("unable to restore VM {} - VM already exists", vmid))
                } else if self.volume(archive).is_none() {
                    Err(format!("archive '{}' does not exist", archive))
                } else {
                    let mut config = BTreeMap::new();
                    config.insert("name".to_string(), json!(format!("template-{}", vmid)));
                    config.insert("template".to_string(), json!(1));
                    config.insert(
                        "scsi0".to_string(),
                        json!(format!("{}:base-{}-disk-0", storage, vmid)),
                    );
                    lock(&self.sim).vm_configs.insert(*vmid, config);
                    Ok(())
                };
                (vec![format!("restore '{}' to VM {}", archive, vmid)], outcome)
            }
            TaskRequest::DiskWipe { disk } => (vec![format!("wiping {}", disk)], Ok(())),
        };
        Ok(self.start_task(task_type, &subject, steps, outcome))
    }

    async fn task_status(&self, upid: &Upid) -> Result<TaskStatus, VgError> {
        {
            let mut faults = lock(&self.faults);
            if faults.status_failures > 0 {
                faults.status_failures -= 1;
                return Err(VgError::Transport("connection reset by peer".into()));
            }
        }
        lock(&self.sim)
            .tasks
            .get(upid)
            .map(|t| t.status.clone())
            .ok_or_else(|| node_error(format!("no such task '{}'", upid)))
    }

    async fn task_log(
        &self,
        upid: &Upid,
        start: u64,
        limit: u64,
    ) -> Result<Vec<TaskLogLine>, VgError> {
        let sim = lock(&self.sim);
        let task = sim
            .tasks
            .get(upid)
            .ok_or_else(|| node_error(format!("no such task '{}'", upid)))?;
        Ok(task
            .log
            .iter()
            .enumerate()
            .skip(start as usize)
            .take(limit as usize)
            .map(|(n, t)| TaskLogLine {
                n: n as u64,
                t: t.clone(),
            })
            .collect())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, VgError> {
        let sim = lock(&self.sim);
        let mut tasks: Vec<Task> = sim
            .tasks
            .values()
            .map(|t| t.task.clone())
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by(|a, b| b.starttime.cmp(&a.starttime).then(b.upid.cmp(&a.upid)));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn stop_task(&self, upid: &Upid) -> Result<(), VgError> {
        let mut sim = lock(&self.sim);
        let task = sim
            .tasks
            .get_mut(upid)
            .ok_or_else(|| node_error(format!("no such task '{}'", upid)))?;
        task.stop_requested = true;
        Ok(())
    }

    async fn storage_info(&self, storage: &str) -> Result<StorageInfo, VgError> {
        lock(&self.sim)
            .storages
            .get(storage)
            .cloned()
            .ok_or_else(|| node_error(format!("storage '{}' does not exist", storage)))
    }

    async fn upload(
        &self,
        request: &UploadRequest,
        mut body: ByteStream,
    ) -> Result<Option<Upid>, VgError> {
        self.has_storage(&request.storage)?;

        let delay = lock(&self.faults).upload_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| VgError::Transport(format!("upload body: {}", e)))?;
            buf.extend_from_slice(&chunk);
        }

        let fault = lock(&self.faults).upload_error.clone();
        if let Some(message) = fault {
            return Err(node_error(message));
        }
        if let Some(expected) = request.size {
            if expected != buf.len() as u64 {
                return Err(node_error(format!(
                    "upload size mismatch: expected {} bytes, got {}",
                    expected,
                    buf.len()
                )));
            }
        }

        let data = buf.freeze();
        let volid = request.volume_id();
        let mut steps = vec![format!("wrote {} bytes to '{}'", data.len(), volid)];
        if let Some(algorithm) = request.checksum_algorithm {
            steps.push(checksum_line(algorithm, &data));
        }
        self.put_volume(&volid, data);

        let upid = self.start_task("imgcopy", &request.storage, steps, Ok(()));
        Ok(Some(upid))
    }

    async fn download(&self, volid: &str) -> Result<Download, VgError> {
        let data = self
            .volume(volid)
            .ok_or_else(|| node_error(format!("volume '{}' does not exist", volid)))?;
        let size = data.len() as u64;
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..data.len())
            .step_by(DOWNLOAD_CHUNK)
            .map(|offset| Ok(data.slice(offset..(offset + DOWNLOAD_CHUNK).min(data.len()))))
            .collect();
        Ok(Download {
            size: Some(size),
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }

    async fn open_console(
        &self,
        target: &ConsoleTarget,
        kind: ConsoleKind,
        auth: Option<&ConsoleAuth>,
    ) -> Result<ConsoleTicket, VgError> {
        if kind == ConsoleKind::Terminal && auth.map(|a| a.ticket.is_empty()).unwrap_or(true) {
            return Err(VgError::RemoteApi {
                code: Some(401),
                message: "permission check failed".into(),
            });
        }
        if let ConsoleTarget::Vm { vmid } = target {
            if !lock(&self.sim).vm_configs.contains_key(vmid) {
                return Err(node_error(format!("VM {} does not exist", vmid)));
            }
        }
        let upstream = lock(&self.faults)
            .console_upstream
            .ok_or_else(|| node_error("console proxy not available"))?;
        let pid = self.pid.fetch_add(1, Ordering::SeqCst);
        Ok(ConsoleTicket {
            host: upstream.ip().to_string(),
            port: upstream.port(),
            ticket: format!("PVEVNC:{:08X}::{}", pid, kind.endpoint()),
            cert: Some("-----BEGIN CERTIFICATE-----\nSIMULATED\n-----END CERTIFICATE-----\n".into()),
            user: "root@pam".into(),
            upid: None,
        })
    }

    async fn vm_config(&self, vmid: u32) -> Result<BTreeMap<String, Value>, VgError> {
        let mut config = lock(&self.sim).vm_configs.get(&vmid).cloned().ok_or_else(|| {
            node_error(format!(
                "Configuration file 'nodes/{}/qemu-server/{}.conf' does not exist",
                self.name, vmid
            ))
        })?;
        let digest = node_digest(&config);
        config.insert(DIGEST_KEY.to_string(), json!(digest));
        Ok(config)
    }

    async fn update_vm_config(
        &self,
        vmid: u32,
        changes: &BTreeMap<String, Value>,
        digest: Option<&str>,
    ) -> Result<(), VgError> {
        let pending = lock(&self.faults).pending_edit.take();
        let mut sim = lock(&self.sim);
        let config = sim.vm_configs.get_mut(&vmid).ok_or_else(|| {
            node_error(format!(
                "Configuration file 'nodes/{}/qemu-server/{}.conf' does not exist",
                self.name, vmid
            ))
        })?;
        if let Some((key, value)) = pending {
            config.insert(key, value);
        }
        if let Some(expected) = digest {
            let current = node_digest(config);
            if current != expected {
                return Err(VgError::Conflict {
                    resource: format!("vm/{}", vmid),
                    expected: expected.to_string(),
                    current,
                });
            }
        }
        apply_changes(config, changes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_stopped(node: &InMemoryNode, upid: &Upid) -> TaskStatus {
        for _ in 0..200 {
            let status = node.task_status(upid).await.unwrap();
            if !status.is_running() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never stopped", upid);
    }

    #[tokio::test]
    async fn test_task_runs_to_completion() {
        let node = InMemoryNode::new("pve1");
        let upid = node
            .submit(&TaskRequest::VmCreate {
                vmid: 100,
                config: BTreeMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(upid.node(), Some("pve1"));
        assert_eq!(upid.task_type(), Some("qmcreate"));

        let status = wait_stopped(&node, &upid).await;
        assert!(status.succeeded());

        let log = node.task_log(&upid, 0, 50).await.unwrap();
        assert_eq!(log.first().map(|l| l.n), Some(0));
        assert_eq!(log.last().map(|l| l.t.as_str()), Some("TASK OK"));
    }

    #[tokio::test]
    async fn test_stop_is_advisory_until_next_step() {
        let node = InMemoryNode::new("pve1");
        node.set_task_duration(None);
        let upid = node.submit(&TaskRequest::DiskWipe { disk: "/dev/sdb".into() }).await.unwrap();

        node.stop_task(&upid).await.unwrap();
        assert!(node.task_status(&upid).await.unwrap().is_running());

        node.finish_task(&upid, Err("interrupted by signal".into()));
        let status = node.task_status(&upid).await.unwrap();
        assert_eq!(status.exitstatus.as_deref(), Some("interrupted by signal"));
    }

    #[tokio::test]
    async fn test_config_write_checks_node_digest() {
        let node = InMemoryNode::new("pve1");
        node.set_vm_config(100, BTreeMap::from([("cores".to_string(), json!(2))]));

        let read = node.vm_config(100).await.unwrap();
        let digest = read[DIGEST_KEY].as_str().unwrap().to_string();
        let change = BTreeMap::from([("cores".to_string(), json!(4))]);
        node.update_vm_config(100, &change, Some(&digest)).await.unwrap();

        // The old fingerprint no longer matches
        let err = node
            .update_vm_config(100, &change, Some(&digest))
            .await
            .unwrap_err();
        assert!(matches!(err, VgError::Conflict { .. }));
        assert_eq!(node.vm_config(100).await.unwrap()["cores"], json!(4));
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let node = InMemoryNode::new("pve1");
        node.set_task_duration(Some(Duration::ZERO));
        let request = UploadRequest {
            storage: "local".into(),
            content: vg_core::ContentClass::Iso,
            filename: "tiny.iso".into(),
            size: Some(11),
            checksum_algorithm: Some(ChecksumAlgorithm::Sha256),
        };
        let body: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));
        let upid = node.upload(&request, body).await.unwrap().unwrap();
        let log = node.task_log(&upid, 0, 10).await.unwrap();
        assert!(log.iter().any(|l| l.t.starts_with("sha256 checksum")));

        let download = node.download("local:iso/tiny.iso").await.unwrap();
        assert_eq!(download.size, Some(11));
        let chunks: Vec<_> = download.body.collect().await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_storage_visible_across_nodes() {
        let shared = Arc::new(SharedStorage::default());
        let a = InMemoryNode::in_cluster("a", Arc::clone(&shared));
        let b = InMemoryNode::in_cluster("b", Arc::clone(&shared));
        a.add_storage("nfs", true);
        b.add_storage("nfs", true);

        a.put_volume("nfs:iso/x.iso", Bytes::from_static(b"x"));
        assert!(b.volume("nfs:iso/x.iso").is_some());

        a.put_volume("local:iso/y.iso", Bytes::from_static(b"y"));
        assert!(b.volume("local:iso/y.iso").is_none());
    }

    #[tokio::test]
    async fn test_upload_fault() {
        let node = InMemoryNode::new("pve1");
        node.set_upload_fault(Some("No space left on device"));
        let request = UploadRequest {
            storage: "local".into(),
            content: vg_core::ContentClass::Vztmpl,
            filename: "t.tar.zst".into(),
            size: None,
            checksum_algorithm: None,
        };
        let body: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(b"t"))]));
        let err = node.upload(&request, body).await.unwrap_err();
        assert!(err.to_string().contains("No space left"));
        assert!(node.volume("local:vztmpl/t.tar.zst").is_none());
    }
}
