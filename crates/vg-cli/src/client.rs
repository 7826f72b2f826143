//! HTTP client for the orchestrator API
//!
//! Every request carries the bearer token the daemon wrote on start-up.
//! Responses go through the shared envelope adapter, so a failure surfaces
//! as the daemon's own message whatever the HTTP status.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::codec::{BytesCodec, FramedRead};

use vg_core::api_token::read_token;
use vg_core::config::OrchestratorConfig;
use vg_core::model::{LogCursor, Task, TaskFilter, TaskLogLine, TaskStatus};
use vg_core::{ClusterId, ConsoleKind, NodeName, SyncStatus, SyncTaskId, TaskKey, TemplateId, Upid};
use vg_orchestrator::console::ConsoleGrant;
use vg_orchestrator::sync::{FanOutResult, SyncTaskView};
use vg_orchestrator::upload::{UploadOutcome, UploadSessionView};
use vg_protocol::{parse_list_response, parse_response, ListPage};

const API_PREFIX: &str = "/api/v1";

/// Lines requested per log call while following
const FOLLOW_BATCH: u64 = 500;

/// Where one task lives
#[derive(Debug, Clone)]
pub struct TaskRef {
    pub cluster_id: ClusterId,
    /// Routed by the UPID's node when absent
    pub node_name: Option<NodeName>,
    pub upid: Upid,
}

impl TaskRef {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("cluster_id", self.cluster_id.to_string()),
            ("upid", self.upid.to_string()),
        ];
        if let Some(node) = &self.node_name {
            query.push(("node_name", node.to_string()));
        }
        query
    }
}

/// Fields of a template upload besides the file itself
#[derive(Debug, Clone, Default)]
pub struct TemplateForm {
    pub template_name: String,
    pub description: Option<String>,
    pub cluster_id: u32,
    pub storage_id: u32,
    pub node_name: Option<String>,
    pub auto_sync: bool,
    pub sync_nodes: Vec<String>,
    pub hash_algorithm: Option<String>,
}

/// Fields of a plain storage upload besides the file itself
#[derive(Debug, Clone, Default)]
pub struct VolumeForm {
    pub cluster_id: u32,
    pub node_name: String,
    pub storage: String,
    pub content: String,
    pub hash_algorithm: Option<String>,
}

/// Client for the orchestrator daemon
pub struct ApiClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Client for the daemon at `address` (`host:port` or a full URL)
    pub fn new(address: &str, token: impl Into<String>) -> Result<Self> {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address)
        };
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url,
            token: token.into(),
            http,
        })
    }

    /// Client for the daemon described by `config`, using its token file
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let token = read_token(&config.token_path).with_context(|| {
            format!(
                "Failed to read API token from {:?}. Is the orchestrator running?",
                config.token_path
            )
        })?;
        Self::new(&config.http_bind, token)
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    async fn read(&self, request: RequestBuilder) -> Result<(u16, Vec<u8>)> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Failed to reach orchestrator at {}. Is it running?", self.base_url))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?;
        tracing::debug!(status, bytes = body.len(), "Response received");
        Ok((status, body.to_vec()))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let (status, body) = self.read(request).await?;
        Ok(parse_response(status, &body)?)
    }

    /// Liveness check; needs no token
    pub async fn health(&self) -> Result<serde_json::Value> {
        self.send(self.http.get(self.url("/health"))).await
    }

    pub async fn task_status(&self, task: &TaskRef) -> Result<TaskStatus> {
        self.send(self.http.get(self.url("/tasks/status")).query(&task.query()))
            .await
    }

    pub async fn task_log(&self, task: &TaskRef, start: u64, limit: u64) -> Result<Vec<TaskLogLine>> {
        let request = self
            .http
            .get(self.url("/tasks/log"))
            .query(&task.query())
            .query(&[("start", start), ("limit", limit)]);
        self.send(request).await
    }

    pub async fn stop_task(&self, task: &TaskRef) -> Result<TaskKey> {
        self.send(self.http.delete(self.url("/tasks/stop")).query(&task.query()))
            .await
    }

    /// Tasks of a whole cluster, or of one node when given
    pub async fn list_tasks(
        &self,
        cluster: ClusterId,
        node: Option<&NodeName>,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>> {
        let request = match node {
            Some(node) => self
                .http
                .get(self.url("/tasks/node"))
                .query(&[("cluster_id", cluster.to_string()), ("node_name", node.to_string())]),
            None => self
                .http
                .get(self.url("/tasks/cluster"))
                .query(&[("cluster_id", cluster.to_string())]),
        };
        self.send(request.query(filter)).await
    }

    /// Print every log line until the task stops, then return its final status
    ///
    /// Starts at line `start`. Lines written between the last poll and the
    /// stop are still delivered.
    pub async fn follow_log<F>(
        &self,
        task: &TaskRef,
        start: u64,
        interval: Duration,
        mut on_line: F,
    ) -> Result<TaskStatus>
    where
        F: FnMut(&TaskLogLine),
    {
        let mut cursor = LogCursor::new(start);
        loop {
            self.drain(task, &mut cursor, &mut on_line).await?;
            let status = self.task_status(task).await?;
            if !status.is_running() {
                self.drain(task, &mut cursor, &mut on_line).await?;
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn drain<F>(&self, task: &TaskRef, cursor: &mut LogCursor, on_line: &mut F) -> Result<()>
    where
        F: FnMut(&TaskLogLine),
    {
        loop {
            let batch = self.task_log(task, cursor.next(), FOLLOW_BATCH).await?;
            let fresh = cursor.advance(batch);
            if fresh.is_empty() {
                return Ok(());
            }
            fresh.iter().for_each(&mut *on_line);
        }
    }

    pub async fn list_sync_tasks(
        &self,
        page: usize,
        page_size: usize,
        template_id: Option<TemplateId>,
        status: Option<SyncStatus>,
    ) -> Result<ListPage<SyncTaskView>> {
        let mut query = vec![("page", page.to_string()), ("page_size", page_size.to_string())];
        if let Some(id) = template_id {
            query.push(("template_id", id.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        let (code, body) = self
            .read(self.http.get(self.url("/templates/sync-tasks")).query(&query))
            .await?;
        Ok(parse_list_response(code, &body)?)
    }

    pub async fn sync_task(&self, id: SyncTaskId) -> Result<SyncTaskView> {
        self.send(self.http.get(self.url(&format!("/templates/sync-tasks/{}", id))))
            .await
    }

    pub async fn retry_sync_task(&self, id: SyncTaskId) -> Result<SyncTaskView> {
        self.send(
            self.http
                .post(self.url(&format!("/templates/sync-tasks/{}/retry", id))),
        )
        .await
    }

    /// Fan an existing template out to more nodes
    pub async fn sync_template(&self, id: TemplateId, targets: &[NodeName]) -> Result<Vec<SyncTaskView>> {
        self.send(
            self.http
                .post(self.url(&format!("/templates/{}/sync", id)))
                .json(&json!({ "target_nodes": targets })),
        )
        .await
    }

    /// Upload a template file and let the daemon fan it out
    pub async fn upload_template(&self, form: &TemplateForm, path: &Path) -> Result<FanOutResult> {
        let mut multipart = Form::new()
            .text("template_name", form.template_name.clone())
            .text("cluster_id", form.cluster_id.to_string())
            .text("storage_id", form.storage_id.to_string())
            .text("auto_sync", form.auto_sync.to_string());
        if let Some(description) = &form.description {
            multipart = multipart.text("description", description.clone());
        }
        if let Some(node) = &form.node_name {
            multipart = multipart.text("node_name", node.clone());
        }
        if !form.sync_nodes.is_empty() {
            multipart = multipart.text("sync_nodes", form.sync_nodes.join(","));
        }
        if let Some(algorithm) = &form.hash_algorithm {
            multipart = multipart.text("hash_algorithm", algorithm.clone());
        }
        let (part, size) = file_part(path).await?;
        let multipart = multipart.text("size", size.to_string()).part("file", part);

        self.send(self.http.post(self.url("/templates/upload")).multipart(multipart))
            .await
    }

    /// Upload a file straight to one node's storage
    pub async fn upload_volume(&self, form: &VolumeForm, path: &Path) -> Result<UploadOutcome> {
        let mut multipart = Form::new()
            .text("cluster_id", form.cluster_id.to_string())
            .text("node_name", form.node_name.clone())
            .text("storage", form.storage.clone())
            .text("content", form.content.clone());
        if let Some(algorithm) = &form.hash_algorithm {
            multipart = multipart.text("hash_algorithm", algorithm.clone());
        }
        let (part, size) = file_part(path).await?;
        let multipart = multipart.text("size", size.to_string()).part("file", part);

        self.send(
            self.http
                .post(self.url("/nodes/storage/upload"))
                .multipart(multipart),
        )
        .await
    }

    pub async fn list_uploads(&self) -> Result<Vec<UploadSessionView>> {
        self.send(self.http.get(self.url("/uploads"))).await
    }

    /// Ask for a single-use console credential on a node, or a guest when `vmid` is set
    pub async fn create_console(
        &self,
        cluster: ClusterId,
        node: &NodeName,
        vmid: Option<u32>,
        kind: ConsoleKind,
    ) -> Result<ConsoleGrant> {
        let request = match vmid {
            Some(vmid) => self.http.post(self.url("/vms/console")).json(&json!({
                "cluster_id": cluster,
                "node_name": node,
                "vmid": vmid,
                "kind": kind,
            })),
            None => self.http.post(self.url("/nodes/console")).json(&json!({
                "cluster_id": cluster,
                "node_name": node,
                "kind": kind,
            })),
        };
        self.send(request).await
    }
}

/// Streamed multipart part for a local file, plus its size
async fn file_part(path: &Path) -> Result<(Part, u64)> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {:?}", path))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {:?}", path))?
        .len();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{:?} has no file name", path))?;

    let stream = FramedRead::new(file, BytesCodec::new());
    let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), size)
        .file_name(filename)
        .mime_str("application/octet-stream")
        .context("Invalid MIME type")?;
    Ok((part, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_forms() {
        let client = ApiClient::new("127.0.0.1:8750", "t").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8750");
        assert_eq!(client.url("/health"), "http://127.0.0.1:8750/api/v1/health");

        let client = ApiClient::new("https://gate.example.com/", "t").unwrap();
        assert_eq!(client.base_url(), "https://gate.example.com");
    }

    #[test]
    fn test_task_ref_query_omits_missing_node() {
        let task = TaskRef {
            cluster_id: ClusterId(3),
            node_name: None,
            upid: Upid::new("UPID:pve1:1:1:1:qmstart:100:root@pam:"),
        };
        let query = task.query();
        assert_eq!(query.len(), 2);
        assert!(query.iter().all(|(k, _)| *k != "node_name"));
    }
}
