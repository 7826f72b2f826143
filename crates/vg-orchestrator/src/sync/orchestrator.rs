//! Template fan-out
//!
//! A template lands on one node first. When its storage is node-local, every
//! other requested node gets its own [`SyncTask`] and its own worker, so one
//! failed copy can be retried without touching the copies that worked.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use vg_core::config::OrchestratorConfig;
use vg_core::model::{split_volume_id, TaskRequest, UploadRequest};
use vg_core::time::Clock;
use vg_core::traits::ByteStream;
use vg_core::{
    ChecksumAlgorithm, ClusterId, ContentClass, NodeName, SyncStatus, SyncTaskId, TaskKey,
    TemplateId, VgError,
};
use vg_protocol::ListPage;

use super::task::{SyncPlan, SyncTask, SyncTaskView};
use super::template::{content_for_file, RestoreSource, Template, TemplateStore};
use crate::node::{with_deadline, NodePool};
use crate::task::{LogTail, TaskRegistry};
use crate::upload::{ProgressFn, UploadCoordinator};

/// Default page size for sync task listings
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Largest page size for sync task listings
pub const MAX_PAGE_SIZE: usize = 200;
/// Guest ids of imported templates start here unless one is given
pub const IMPORT_VMID_BASE: u64 = 9000;

/// A template file about to be uploaded
#[derive(Debug, Clone)]
pub struct TemplateUpload {
    pub name: String,
    pub description: Option<String>,
    pub cluster_id: ClusterId,
    pub storage_id: u32,
    pub filename: String,
    pub size: Option<u64>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    /// Fan out after the upload when the storage is local
    pub auto_sync: bool,
    /// Nodes to fan out to; every other node of the cluster when empty
    pub sync_nodes: Vec<NodeName>,
    /// Node that receives the upload; the cluster's first node when absent
    pub import_node: Option<NodeName>,
}

/// Import of an existing backup archive as a template
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateImport {
    pub template_name: String,
    pub cluster_id: ClusterId,
    pub node_name: NodeName,
    pub backup_storage_id: u32,
    /// Volume id, or a file name within the backup storage
    pub backup_file: String,
    pub target_storage_id: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sync_nodes: Vec<NodeName>,
    #[serde(default)]
    pub vmid: Option<u32>,
}

/// Filter and page for sync task listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncTaskQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub status: Option<SyncStatus>,
}

/// Primary copy plus the sync tasks created for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutResult {
    pub template_id: TemplateId,
    pub upload_id: Option<String>,
    pub storage_type: String,
    pub is_shared: bool,
    pub import_node: NodeName,
    pub primary_copy: String,
    pub sync_tasks: Vec<SyncTaskView>,
}

struct Inner {
    nodes: Arc<NodePool>,
    tasks: Arc<TaskRegistry>,
    uploads: Arc<UploadCoordinator>,
    templates: TemplateStore,
    sync_tasks: DashMap<SyncTaskId, Arc<SyncTask>>,
    /// Pending or syncing task per (template, target)
    active: DashMap<(TemplateId, NodeName), SyncTaskId>,
    next_task_id: AtomicU64,
    limiter: Option<Arc<Semaphore>>,
    control_timeout: Duration,
    transfer_timeout: Duration,
    import_timeout: Duration,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

/// Distributes templates across the nodes of a cluster
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Create an orchestrator
    pub fn new(
        nodes: Arc<NodePool>,
        tasks: Arc<TaskRegistry>,
        uploads: Arc<UploadCoordinator>,
        config: &OrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                nodes,
                tasks,
                uploads,
                templates: TemplateStore::new(),
                sync_tasks: DashMap::new(),
                active: DashMap::new(),
                next_task_id: AtomicU64::new(0),
                limiter: config
                    .max_parallel_syncs
                    .map(|n| Arc::new(Semaphore::new(n))),
                control_timeout: config.control_timeout,
                transfer_timeout: config.transfer_timeout,
                import_timeout: config.import_timeout,
                poll_interval: config.task_poll_interval,
                clock,
            }),
        }
    }

    /// Upload a template to one node and fan it out if its storage is local
    pub async fn initiate_upload(
        &self,
        upload: TemplateUpload,
        body: ByteStream,
        on_progress: Option<ProgressFn>,
    ) -> Result<FanOutResult, VgError> {
        let inner = &self.inner;
        if upload.name.trim().is_empty() {
            return Err(VgError::Validation("template_name is required".into()));
        }
        let storage = inner.nodes.storage_name(upload.cluster_id, upload.storage_id)?;
        let import_node = match &upload.import_node {
            Some(node) => node.clone(),
            None => inner.first_node(upload.cluster_id)?,
        };
        inner.check_nodes(upload.cluster_id, std::slice::from_ref(&import_node))?;
        inner.check_nodes(upload.cluster_id, &upload.sync_nodes)?;

        let request = UploadRequest {
            storage: storage.clone(),
            content: content_for_file(&upload.filename),
            filename: upload.filename.clone(),
            size: upload.size,
            checksum_algorithm: upload.checksum_algorithm,
        };
        request.validate()?;

        let client = inner.nodes.get(upload.cluster_id, &import_node)?;
        let info = with_deadline(
            "storage status",
            inner.control_timeout,
            client.storage_info(&storage),
        )
        .await?;

        let outcome = inner
            .uploads
            .upload(upload.cluster_id, &import_node, request.clone(), body, on_progress)
            .await?;
        if let Some(key) = &outcome.task {
            inner.tasks.track(key.clone());
            inner.tasks.wait_succeeded(key, inner.transfer_timeout).await?;
        }

        let template = Template {
            id: inner.templates.next_id(),
            name: upload.name.clone(),
            description: upload.description.clone(),
            cluster_id: upload.cluster_id,
            primary_node: import_node.clone(),
            storage: storage.clone(),
            volid: outcome.volid.clone(),
            content: request.content,
            size: Some(outcome.bytes),
            shared: info.shared,
            restore: None,
            created_at: inner.clock.now_millis(),
        };
        inner.templates.insert(template.clone());
        tracing::info!(
            template_id = %template.id,
            name = %template.name,
            node = %import_node,
            volid = %template.volid,
            shared = info.shared,
            "Template uploaded"
        );

        let sync_tasks = if info.shared {
            tracing::info!(template_id = %template.id, storage = %storage, "Shared storage, no sync needed");
            Vec::new()
        } else if upload.auto_sync {
            let targets = inner.targets_or_all(upload.cluster_id, upload.sync_nodes)?;
            self.fan_out(&template, targets)
        } else {
            Vec::new()
        };

        Ok(FanOutResult {
            template_id: template.id,
            upload_id: Some(outcome.upload_id),
            storage_type: info.storage_type,
            is_shared: info.shared,
            import_node,
            primary_copy: template.volid,
            sync_tasks,
        })
    }

    /// Restore a backup archive as a template, then fan it out
    pub async fn import_from_backup(&self, import: TemplateImport) -> Result<FanOutResult, VgError> {
        let inner = &self.inner;
        if import.template_name.trim().is_empty() {
            return Err(VgError::Validation("template_name is required".into()));
        }
        if import.backup_file.trim().is_empty() {
            return Err(VgError::Validation("backup_file is required".into()));
        }
        let cluster = import.cluster_id;
        let backup_storage = inner.nodes.storage_name(cluster, import.backup_storage_id)?;
        let target_storage = inner.nodes.storage_name(cluster, import.target_storage_id)?;
        inner.check_nodes(cluster, std::slice::from_ref(&import.node_name))?;
        inner.check_nodes(cluster, &import.sync_nodes)?;

        let archive_volid = if import.backup_file.contains(':') {
            import.backup_file.clone()
        } else {
            format!("{}:{}/{}", backup_storage, ContentClass::Backup, import.backup_file)
        };
        if split_volume_id(&archive_volid).is_none() {
            return Err(VgError::Validation(format!(
                "invalid backup file '{}'",
                import.backup_file
            )));
        }

        let id = inner.templates.next_id();
        let vmid = match import.vmid {
            Some(vmid) => vmid,
            None => u32::try_from(IMPORT_VMID_BASE + id.0).map_err(|_| {
                VgError::Validation("no guest id left for the imported template".into())
            })?,
        };

        let client = inner.nodes.get(cluster, &import.node_name)?;
        let backup_info = with_deadline(
            "storage status",
            inner.control_timeout,
            client.storage_info(&backup_storage),
        )
        .await?;
        let target_info = with_deadline(
            "storage status",
            inner.control_timeout,
            client.storage_info(&target_storage),
        )
        .await?;

        let restore = TaskRequest::RestoreTemplate {
            vmid,
            archive: archive_volid.clone(),
            storage: target_storage.clone(),
        };
        let key = inner.tasks.submit(cluster, &import.node_name, &restore).await?;
        inner.tasks.wait_succeeded(&key, inner.import_timeout).await?;

        let template = Template {
            id,
            name: import.template_name.clone(),
            description: import.description.clone(),
            cluster_id: cluster,
            primary_node: import.node_name.clone(),
            storage: target_storage.clone(),
            volid: archive_volid.clone(),
            content: ContentClass::Backup,
            size: None,
            shared: target_info.shared,
            restore: Some(RestoreSource {
                vmid,
                archive_volid,
                archive_storage: backup_storage,
                archive_shared: backup_info.shared,
            }),
            created_at: inner.clock.now_millis(),
        };
        inner.templates.insert(template.clone());
        tracing::info!(
            template_id = %template.id,
            name = %template.name,
            node = %import.node_name,
            vmid,
            "Template imported"
        );

        let sync_tasks = if target_info.shared {
            Vec::new()
        } else {
            self.fan_out(&template, import.sync_nodes)
        };

        Ok(FanOutResult {
            template_id: template.id,
            upload_id: None,
            storage_type: target_info.storage_type,
            is_shared: target_info.shared,
            import_node: import.node_name,
            primary_copy: template.volid,
            sync_tasks,
        })
    }

    /// Distribute an existing template to more nodes
    pub fn sync(
        &self,
        template_id: TemplateId,
        targets: Vec<NodeName>,
    ) -> Result<Vec<SyncTaskView>, VgError> {
        let template = self.inner.templates.get(template_id)?;
        if targets.is_empty() {
            return Err(VgError::Validation("at least one target node is required".into()));
        }
        self.inner.check_nodes(template.cluster_id, &targets)?;
        if template.shared {
            tracing::info!(template_id = %template_id, "Shared storage, no sync needed");
            return Ok(Vec::new());
        }
        Ok(self.fan_out(&template, targets))
    }

    /// Retry a failed sync task
    ///
    /// Only a `failed` task moves; any other status is refused without side
    /// effects, including a retry racing one that already won. A failed task
    /// whose template and target have since been handed to a newer task is
    /// refused as well.
    pub fn retry(&self, id: SyncTaskId) -> Result<SyncTaskView, VgError> {
        let task = self.inner.get(id)?;
        let now = self.inner.clock.now_millis();

        // The entry guard keeps fan-out off this edge until the claim is recorded
        match self
            .inner
            .active
            .entry((task.template_id, task.target_node.clone()))
        {
            Entry::Occupied(current) if *current.get() != task.id => {
                let by = *current.get();
                tracing::warn!(task_id = %id, superseded_by = %by, "Retry refused");
                return Err(VgError::Superseded {
                    task_id: id.to_string(),
                    by: by.to_string(),
                });
            }
            slot => {
                task.try_retry(now).map_err(|status| VgError::NotRetryable {
                    task_id: id.to_string(),
                    status,
                })?;
                slot.or_insert(task.id);
            }
        }

        tracing::info!(task_id = %id, target = %task.target_node, "Retrying sync task");
        let view = task.view();
        tokio::spawn(Inner::run(Arc::clone(&self.inner), task, true));
        Ok(view)
    }

    /// One sync task
    pub fn get_sync_task(&self, id: SyncTaskId) -> Result<SyncTaskView, VgError> {
        Ok(self.inner.get(id)?.view())
    }

    /// Sync tasks, newest first, one page at a time (pages start at 1)
    pub fn list_sync_tasks(&self, query: &SyncTaskQuery) -> Result<ListPage<SyncTaskView>, VgError> {
        let page = query.page.unwrap_or(1);
        if page == 0 {
            return Err(VgError::Validation("page starts at 1".into()));
        }
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let mut views: Vec<SyncTaskView> = self
            .inner
            .sync_tasks
            .iter()
            .map(|t| t.view())
            .filter(|v| query.template_id.map_or(true, |id| v.template_id == id))
            .filter(|v| query.status.map_or(true, |s| v.status == s))
            .collect();
        views.sort_by(|a, b| b.task_id.cmp(&a.task_id));

        let total = views.len() as u64;
        let list = views
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Ok(ListPage { total, list })
    }

    /// A template record
    pub fn template(&self, id: TemplateId) -> Result<Template, VgError> {
        self.inner.templates.get(id)
    }

    /// Create one task per distinct target and start its worker
    ///
    /// The primary node is skipped. A target that already has an active
    /// task for this template gets that task back instead of a new one.
    fn fan_out(&self, template: &Template, targets: Vec<NodeName>) -> Vec<SyncTaskView> {
        let inner = &self.inner;
        let mut seen = Vec::new();
        let mut views = Vec::new();
        for target in targets {
            if target == template.primary_node || seen.contains(&target) {
                continue;
            }
            seen.push(target.clone());

            let task = match inner.active.entry((template.id, target.clone())) {
                Entry::Occupied(mut existing) => {
                    let current = inner
                        .sync_tasks
                        .get(existing.get())
                        .map(|t| Arc::clone(&t));
                    match current {
                        Some(task) if task.status().is_active() => {
                            views.push(task.view());
                            continue;
                        }
                        _ => {
                            let task = inner.create_task(template, target);
                            existing.insert(task.id);
                            task
                        }
                    }
                }
                Entry::Vacant(slot) => {
                    let task = inner.create_task(template, target);
                    slot.insert(task.id);
                    task
                }
            };
            views.push(task.view());
            tokio::spawn(Inner::run(Arc::clone(inner), task, false));
        }
        tracing::info!(template_id = %template.id, tasks = views.len(), "Fan-out scheduled");
        views
    }
}

impl Inner {
    fn get(&self, id: SyncTaskId) -> Result<Arc<SyncTask>, VgError> {
        self.sync_tasks
            .get(&id)
            .map(|t| Arc::clone(&t))
            .ok_or_else(|| VgError::NotFound(format!("sync task {}", id)))
    }

    fn first_node(&self, cluster: ClusterId) -> Result<NodeName, VgError> {
        self.nodes
            .cluster(cluster)?
            .node_names()
            .into_iter()
            .next()
            .ok_or_else(|| VgError::Validation(format!("cluster {} has no nodes", cluster)))
    }

    fn check_nodes(&self, cluster: ClusterId, nodes: &[NodeName]) -> Result<(), VgError> {
        for node in nodes {
            self.nodes.get(cluster, node).map_err(|_| {
                VgError::Validation(format!("unknown node {} in cluster {}", node, cluster))
            })?;
        }
        Ok(())
    }

    fn targets_or_all(&self, cluster: ClusterId, targets: Vec<NodeName>) -> Result<Vec<NodeName>, VgError> {
        if !targets.is_empty() {
            return Ok(targets);
        }
        Ok(self.nodes.cluster(cluster)?.node_names())
    }

    fn plan_for(template: &Template) -> SyncPlan {
        let filename = split_volume_id(&template.volid)
            .map(|(_, file)| file.to_string())
            .unwrap_or_default();
        match &template.restore {
            None => SyncPlan::CopyVolume {
                source_volid: template.volid.clone(),
                request: UploadRequest {
                    storage: template.storage.clone(),
                    content: template.content,
                    filename,
                    size: template.size,
                    checksum_algorithm: None,
                },
            },
            Some(source) => SyncPlan::Restore {
                archive_volid: source.archive_volid.clone(),
                copy_archive: (!source.archive_shared).then(|| UploadRequest {
                    storage: source.archive_storage.clone(),
                    content: ContentClass::Backup,
                    filename,
                    size: None,
                    checksum_algorithm: None,
                }),
                vmid: source.vmid,
                target_storage: template.storage.clone(),
            },
        }
    }

    fn create_task(&self, template: &Template, target: NodeName) -> Arc<SyncTask> {
        let id = SyncTaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1);
        let task = Arc::new(SyncTask::new(
            id,
            template.id,
            template.name.clone(),
            template.cluster_id,
            template.primary_node.clone(),
            target,
            template.storage.clone(),
            Self::plan_for(template),
            self.clock.now_millis(),
        ));
        self.sync_tasks.insert(id, Arc::clone(&task));
        task
    }

    /// Worker for one sync task
    ///
    /// `claimed` is set when the caller already moved the task to `syncing`.
    async fn run(inner: Arc<Inner>, task: Arc<SyncTask>, claimed: bool) {
        let _permit = match &inner.limiter {
            Some(limiter) => match Arc::clone(limiter).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            None => None,
        };
        if !claimed && !task.try_start(inner.clock.now_millis()) {
            return;
        }
        tracing::info!(
            task_id = %task.id,
            template_id = %task.template_id,
            source = %task.source_node,
            target = %task.target_node,
            "Sync started"
        );

        // Restores run a node-side import after the copy
        let deadline = match task.plan {
            SyncPlan::CopyVolume { .. } => inner.transfer_timeout,
            SyncPlan::Restore { .. } => inner.import_timeout,
        };
        let result = with_deadline(
            &format!("sync task {}", task.id),
            deadline,
            inner.execute(&task),
        )
        .await;

        let now = inner.clock.now_millis();
        match result {
            Ok(()) => {
                task.complete(now);
                tracing::info!(task_id = %task.id, target = %task.target_node, "Sync completed");
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, target = %task.target_node, error = %e, "Sync failed");
                task.fail(now, e.to_string());
            }
        }
        inner
            .active
            .remove_if(&(task.template_id, task.target_node.clone()), |_, id| *id == task.id);
    }

    async fn execute(&self, task: &Arc<SyncTask>) -> Result<(), VgError> {
        match &task.plan {
            SyncPlan::CopyVolume {
                source_volid,
                request,
            } => self.transfer(task, source_volid, request.clone(), 0, 100).await,
            SyncPlan::Restore {
                archive_volid,
                copy_archive,
                vmid,
                target_storage,
            } => {
                if let Some(request) = copy_archive {
                    self.transfer(task, archive_volid, request.clone(), 0, 80).await?;
                }
                let restore = TaskRequest::RestoreTemplate {
                    vmid: *vmid,
                    archive: archive_volid.clone(),
                    storage: target_storage.clone(),
                };
                let key = self
                    .tasks
                    .submit(task.cluster_id, &task.target_node, &restore)
                    .await?;
                self.follow(task, key).await
            }
        }
    }

    /// Stream a volume from the source node into the target node
    ///
    /// Progress is mapped onto `from..to` percent of the task.
    async fn transfer(
        &self,
        task: &Arc<SyncTask>,
        volid: &str,
        request: UploadRequest,
        from: u8,
        to: u8,
    ) -> Result<(), VgError> {
        let source = self.nodes.get(task.cluster_id, &task.source_node)?;
        let download = with_deadline("download", self.control_timeout, source.download(volid)).await?;

        let total = download.size.or(request.size);
        let progress: Option<ProgressFn> = total.filter(|t| *t > 0).map(|total| {
            let task = Arc::clone(task);
            let span = u64::from(to.saturating_sub(from));
            let report: ProgressFn = Arc::new(move |bytes: u64| {
                let pct = u64::from(from) + (bytes.min(total) * span / total);
                task.set_progress(pct as u8);
            });
            report
        });

        let request = UploadRequest {
            size: total,
            ..request
        };
        let outcome = self
            .uploads
            .upload(task.cluster_id, &task.target_node, request, download.body, progress)
            .await?;
        if let Some(key) = outcome.task {
            self.tasks.track(key.clone());
            self.follow(task, key).await?;
        }
        task.set_progress(to);
        Ok(())
    }

    /// Mirror a node task's log and fail if the task does
    async fn follow(&self, task: &SyncTask, key: TaskKey) -> Result<(), VgError> {
        let mut tail = LogTail::new(&self.tasks, key.clone(), 0);
        let status = tail
            .follow(self.poll_interval, |line| {
                tracing::debug!(task_id = %task.id, upid = %key.upid, n = line.n, "{}", line.t);
            })
            .await?;
        if status.succeeded() {
            Ok(())
        } else {
            Err(VgError::RemoteApi {
                code: None,
                message: format!(
                    "task {} failed: {}",
                    key,
                    status.exitstatus.as_deref().unwrap_or("unknown exit status")
                ),
            })
        }
    }
}
