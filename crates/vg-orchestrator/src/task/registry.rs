//! UPID to node routing and status polling

use dashmap::DashMap;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vg_core::config::{BackoffConfig, OrchestratorConfig};
use vg_core::model::{contiguous_from, Task, TaskFilter, TaskLogLine, TaskRequest, TaskStatus};
use vg_core::{ClusterId, NodeName, TaskKey, Upid, VgError};

use crate::node::{with_deadline, NodePool};

/// Largest log batch handed out in one call
pub const MAX_LOG_BATCH: u64 = 5000;
/// Most UPID routes remembered at once
pub const MAX_KNOWN_TASKS: usize = 4096;

/// Tracks remote operations by `(cluster, node, upid)`
pub struct TaskRegistry {
    nodes: Arc<NodePool>,
    /// Issuing node of UPIDs that do not name it themselves
    known: DashMap<Upid, (TaskKey, Instant)>,
    control_timeout: Duration,
    poll_interval: Duration,
    backoff: BackoffConfig,
}

impl TaskRegistry {
    /// Create a registry over a node pool
    pub fn new(nodes: Arc<NodePool>, config: &OrchestratorConfig) -> Self {
        Self {
            nodes,
            known: DashMap::new(),
            control_timeout: config.control_timeout,
            poll_interval: config.task_poll_interval,
            backoff: config.backoff.clone(),
        }
    }

    /// Submit a mutating operation to a node and remember where it runs
    pub async fn submit(
        &self,
        cluster: ClusterId,
        node: &NodeName,
        request: &TaskRequest,
    ) -> Result<TaskKey, VgError> {
        request.validate()?;
        let client = self.nodes.get(cluster, node)?;
        let upid = with_deadline(
            request.task_type(),
            self.control_timeout,
            client.submit(request),
        )
        .await?;

        let key = TaskKey::new(cluster, node.clone(), upid);
        tracing::info!(
            cluster = %cluster,
            node = %node,
            upid = %key.upid,
            task_type = request.task_type(),
            "Submitted task"
        );
        self.track(key.clone());
        Ok(key)
    }

    /// Remember where a UPID runs (uploads and restores come through here too)
    ///
    /// A UPID that already names its node needs no entry. The table is
    /// capped; past the cap the oldest route is forgotten.
    pub fn track(&self, key: TaskKey) {
        if key.upid.node() == Some(key.node_name.as_str()) {
            return;
        }
        if self.known.len() >= MAX_KNOWN_TASKS && !self.known.contains_key(&key.upid) {
            let oldest = self
                .known
                .iter()
                .min_by_key(|entry| entry.value().1)
                .map(|entry| entry.key().clone());
            if let Some(upid) = oldest {
                self.known.remove(&upid);
            }
        }
        self.known.insert(key.upid.clone(), (key, Instant::now()));
    }

    /// Build the full key for a UPID
    ///
    /// An explicit node wins; otherwise the node recorded at submit time, and
    /// failing that the node encoded in the UPID itself.
    pub fn resolve(
        &self,
        cluster: ClusterId,
        node: Option<&NodeName>,
        upid: &Upid,
    ) -> Result<TaskKey, VgError> {
        if upid.as_str().trim().is_empty() {
            return Err(VgError::Validation("upid is required".into()));
        }
        if let Some(node) = node {
            return Ok(TaskKey::new(cluster, node.clone(), upid.clone()));
        }
        if let Some(entry) = self.known.get(upid) {
            let (key, _) = entry.value();
            if key.cluster_id == cluster {
                return Ok(key.clone());
            }
        }
        match upid.node() {
            Some(node) if !node.is_empty() => {
                Ok(TaskKey::new(cluster, NodeName::new(node), upid.clone()))
            }
            _ => Err(VgError::Validation(format!(
                "cannot tell which node issued '{}', node_name is required",
                upid
            ))),
        }
    }

    /// Current status as the issuing node reports it
    pub async fn poll(&self, key: &TaskKey) -> Result<TaskStatus, VgError> {
        let client = self.nodes.get(key.cluster_id, &key.node_name)?;
        with_deadline("task status", self.control_timeout, client.task_status(&key.upid)).await
    }

    /// Log lines from index `start`, gapless and in order
    pub async fn fetch_log(
        &self,
        key: &TaskKey,
        start: u64,
        limit: u64,
    ) -> Result<Vec<TaskLogLine>, VgError> {
        let limit = limit.min(MAX_LOG_BATCH);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let client = self.nodes.get(key.cluster_id, &key.node_name)?;
        let lines = with_deadline(
            "task log",
            self.control_timeout,
            client.task_log(&key.upid, start, limit),
        )
        .await?;
        Ok(contiguous_from(lines, start, limit as usize))
    }

    /// Ask the node to stop an operation
    ///
    /// Success only means the node accepted the request. The task keeps
    /// whatever status the node reports until the node changes it.
    pub async fn cancel(&self, key: &TaskKey) -> Result<(), VgError> {
        let client = self.nodes.get(key.cluster_id, &key.node_name)?;
        with_deadline("stop task", self.control_timeout, client.stop_task(&key.upid)).await?;
        tracing::info!(task = %key, "Stop requested");
        Ok(())
    }

    /// Task records of one node, or of every node of a cluster, newest first
    pub async fn list_tasks(
        &self,
        cluster: ClusterId,
        node: Option<&NodeName>,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>, VgError> {
        let clients = match node {
            Some(node) => vec![self.nodes.get(cluster, node)?],
            None => self.nodes.nodes_in(cluster)?,
        };

        let results = join_all(clients.iter().map(|client| {
            with_deadline("list tasks", self.control_timeout, client.list_tasks(filter))
        }))
        .await;

        let mut tasks = Vec::new();
        for result in results {
            tasks.extend(result?);
        }
        tasks.sort_by(|a, b| b.starttime.cmp(&a.starttime).then_with(|| b.upid.cmp(&a.upid)));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    /// Poll until the task stops or `deadline` passes
    ///
    /// Transient errors are retried with backoff; anything else ends the wait.
    pub async fn wait_for_completion(
        &self,
        key: &TaskKey,
        deadline: Duration,
    ) -> Result<TaskStatus, VgError> {
        let operation = format!("waiting for task {}", key);
        let wait = async {
            let mut failures = 0u32;
            loop {
                match self.poll(key).await {
                    Ok(status) if !status.is_running() => return Ok(status),
                    Ok(_) => {
                        failures = 0;
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(e) if e.is_transient() => {
                        let delay = self.backoff.delay(failures);
                        failures = failures.saturating_add(1);
                        tracing::warn!(task = %key, error = %e, ?delay, "Task poll failed, backing off");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        with_deadline(&operation, deadline, wait).await
    }

    /// Run a read against the task's node until it succeeds or fails for good
    ///
    /// Transient errors are retried with backoff and never bounded here; the
    /// caller owns the deadline.
    pub async fn retry_transient<T, F, Fut>(
        &self,
        key: &TaskKey,
        operation: &str,
        mut read: F,
    ) -> Result<T, VgError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VgError>>,
    {
        let mut failures = 0u32;
        loop {
            match read().await {
                Err(e) if e.is_transient() => {
                    let delay = self.backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(task = %key, error = %e, ?delay, "{} failed, backing off", operation);
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Wait for the task and turn a failed exit status into an error
    pub async fn wait_succeeded(
        &self,
        key: &TaskKey,
        deadline: Duration,
    ) -> Result<TaskStatus, VgError> {
        let status = self.wait_for_completion(key, deadline).await?;
        if status.succeeded() {
            Ok(status)
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
