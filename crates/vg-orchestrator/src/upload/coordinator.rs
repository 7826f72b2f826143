//! Upload sessions with progress and an extended deadline

use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use vg_core::model::UploadRequest;
use vg_core::time::Clock;
use vg_core::traits::ByteStream;
use vg_core::{ClusterId, NodeName, TaskKey, Upid, VgError};

use crate::node::NodePool;

/// Called with the running byte total after every chunk
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// One transfer in flight
struct UploadSession {
    id: String,
    cluster_id: ClusterId,
    node_name: NodeName,
    request: UploadRequest,
    bytes: AtomicU64,
    started_at: u64,
    deadline_at: u64,
}

/// Snapshot of an in-flight upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSessionView {
    pub upload_id: String,
    pub cluster_id: ClusterId,
    pub node_name: NodeName,
    pub storage: String,
    pub content: String,
    pub filename: String,
    pub bytes: u64,
    pub size: Option<u64>,
    pub started_at: u64,
    pub deadline_at: u64,
}

impl UploadSession {
    fn view(&self) -> UploadSessionView {
        UploadSessionView {
            upload_id: self.id.clone(),
            cluster_id: self.cluster_id,
            node_name: self.node_name.clone(),
            storage: self.request.storage.clone(),
            content: self.request.content.to_string(),
            filename: self.request.filename.clone(),
            bytes: self.bytes.load(Ordering::Relaxed),
            size: self.request.size,
            started_at: self.started_at,
            deadline_at: self.deadline_at,
        }
    }
}

/// Result of a finished upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub upload_id: String,
    /// Import task the node started, if it runs one
    pub task: Option<TaskKey>,
    pub bytes: u64,
    pub volid: String,
}

impl UploadOutcome {
    /// UPID of the node-side import task
    pub fn upid(&self) -> Option<&Upid> {
        self.task.as_ref().map(|k| &k.upid)
    }
}

/// Removes a session from the table however the transfer ends
struct SessionGuard<'a> {
    sessions: &'a DashMap<String, Arc<UploadSession>>,
    id: String,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

/// Streams files into node storages
pub struct UploadCoordinator {
    nodes: Arc<NodePool>,
    sessions: DashMap<String, Arc<UploadSession>>,
    transfer_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl UploadCoordinator {
    /// Create a coordinator with the given transfer deadline
    pub fn new(nodes: Arc<NodePool>, transfer_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes,
            sessions: DashMap::new(),
            transfer_timeout,
            clock,
        }
    }

    /// Stream `body` into a storage on one node
    ///
    /// `on_progress` sees a non-decreasing byte count. The whole transfer,
    /// including the node's response, must finish within the transfer
    /// deadline.
    pub async fn upload(
        &self,
        cluster: ClusterId,
        node: &NodeName,
        request: UploadRequest,
        body: ByteStream,
        on_progress: Option<ProgressFn>,
    ) -> Result<UploadOutcome, VgError> {
        request.validate()?;
        let client = self.nodes.get(cluster, node)?;

        let now = self.clock.now_millis();
        let session = Arc::new(UploadSession {
            id: Uuid::new_v4().to_string(),
            cluster_id: cluster,
            node_name: node.clone(),
            request: request.clone(),
            bytes: AtomicU64::new(0),
            started_at: now,
            deadline_at: now + self.transfer_timeout.as_millis() as u64,
        });
        self.sessions
            .insert(session.id.clone(), Arc::clone(&session));
        let _guard = SessionGuard {
            sessions: &self.sessions,
            id: session.id.clone(),
        };

        let volid = request.volume_id();
        tracing::info!(
            upload_id = %session.id,
            cluster = %cluster,
            node = %node,
            volid = %volid,
            size = ?request.size,
            "Upload started"
        );

        let counter = Arc::clone(&session);
        let counted: ByteStream = Box::pin(body.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                let len = bytes.len() as u64;
                let total = counter.bytes.fetch_add(len, Ordering::Relaxed) + len;
                if let Some(report) = &on_progress {
                    report(total);
                }
            }
            chunk
        }));

        let result = match tokio::time::timeout(
            self.transfer_timeout,
            client.upload(&request, counted),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(VgError::Timeout {
                operation: format!("upload of {} to {}", volid, node),
                after: self.transfer_timeout,
            }),
        };

        let bytes = session.bytes.load(Ordering::Relaxed);
        match result {
            Ok(upid) => {
                tracing::info!(upload_id = %session.id, node = %node, volid = %volid, bytes, "Upload finished");
                Ok(UploadOutcome {
                    upload_id: session.id.clone(),
                    task: upid.map(|upid| TaskKey::new(cluster, node.clone(), upid)),
                    bytes,
                    volid,
                })
            }
            Err(e) => {
                tracing::warn!(upload_id = %session.id, node = %node, volid = %volid, bytes, error = %e, "Upload failed");
                Err(e)
            }
        }
    }

    /// Uploads currently in flight, oldest first
    pub fn list(&self) -> Vec<UploadSessionView> {
        let mut views: Vec<UploadSessionView> =
            self.sessions.iter().map(|s| s.view()).collect();
        views.sort_by_key(|v| v.started_at);
        views
    }

    /// Number of uploads in flight
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no upload is in flight
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::InMemoryNode;
    use bytes::Bytes;
    use std::sync::Mutex;
    use vg_core::config::ClusterProfile;
    use vg_core::time::SystemClock;
    use vg_core::ContentClass;

    fn setup(timeout: Duration) -> (Arc<UploadCoordinator>, Arc<InMemoryNode>) {
        let pool = Arc::new(NodePool::new());
        pool.add_cluster(ClusterProfile::in_memory(1, "lab", &["pve1"]));
        let node = Arc::new(InMemoryNode::new("pve1"));
        pool.register(ClusterId(1), node.clone());
        (
            Arc::new(UploadCoordinator::new(pool, timeout, Arc::new(SystemClock))),
            node,
        )
    }

    fn iso(name: &str) -> UploadRequest {
        UploadRequest {
            storage: "local".into(),
            content: ContentClass::Iso,
            filename: name.into(),
            size: None,
            checksum_algorithm: None,
        }
    }

    fn chunks(n: usize) -> ByteStream {
        Box::pin(futures::stream::iter(
            (0..n).map(|_| Ok(Bytes::from(vec![7u8; 1024]))),
        ))
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_session_removed() {
        let (uploads, node) = setup(Duration::from_secs(5));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |n| sink.lock().unwrap().push(n));

        let outcome = uploads
            .upload(ClusterId(1), &NodeName::new("pve1"), iso("a.iso"), chunks(4), Some(progress))
            .await
            .unwrap();

        assert_eq!(outcome.bytes, 4096);
        assert_eq!(outcome.volid, "local:iso/a.iso");
        assert!(outcome.upid().is_some());
        assert_eq!(*seen.lock().unwrap(), vec![1024, 2048, 3072, 4096]);
        assert!(uploads.is_empty());
        assert!(node.volume("local:iso/a.iso").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_enforced() {
        let (uploads, node) = setup(Duration::from_secs(300));
        node.set_upload_delay(Duration::from_secs(600));

        let err = uploads
            .upload(ClusterId(1), &NodeName::new("pve1"), iso("slow.iso"), chunks(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VgError::Timeout { after, .. } if after == Duration::from_secs(300)));
        assert!(uploads.is_empty());
        assert!(node.volume("local:iso/slow.iso").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_uploads_are_listed() {
        let (uploads, node) = setup(Duration::from_secs(300));
        node.set_upload_delay(Duration::from_secs(10));

        let running = Arc::clone(&uploads);
        let handle = tokio::spawn(async move {
            running
                .upload(ClusterId(1), &NodeName::new("pve1"), iso("big.iso"), chunks(2), None)
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let listed = uploads.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "big.iso");

        handle.await.unwrap().unwrap();
        assert!(uploads.list().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_file_name_rejected() {
        let (uploads, _) = setup(Duration::from_secs(5));
        let err = uploads
            .upload(ClusterId(1), &NodeName::new("pve1"), iso("../x.iso"), chunks(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VgError::Validation(_)));
    }
}
