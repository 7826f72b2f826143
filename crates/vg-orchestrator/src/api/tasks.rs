//! Task endpoints

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use vg_core::model::{Task, TaskFilter, TaskLogLine, TaskRequest, TaskStatus};
use vg_core::{ClusterId, NodeName, TaskKey, Upid, VgError};

use super::{ok, ApiResult, SharedState};

/// Log lines returned when the caller gives no limit
const DEFAULT_LOG_LIMIT: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    cluster_id: ClusterId,
    node_name: NodeName,
    #[serde(flatten)]
    request: TaskRequest,
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    cluster_id: ClusterId,
    #[serde(default)]
    node_name: Option<NodeName>,
    upid: Upid,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    cluster_id: ClusterId,
    #[serde(default)]
    node_name: Option<NodeName>,
    upid: Upid,
    #[serde(default)]
    start: u64,
    #[serde(default)]
    limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    cluster_id: ClusterId,
    #[serde(default)]
    node_name: Option<NodeName>,
    #[serde(default)]
    typefilter: Option<String>,
    #[serde(default)]
    statusfilter: Option<String>,
    #[serde(default)]
    since: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
}

impl ListQuery {
    fn filter(&self) -> TaskFilter {
        TaskFilter {
            task_type: self.typefilter.clone(),
            status: self.statusfilter.clone(),
            since: self.since,
            limit: self.limit,
        }
    }
}

/// POST /tasks
pub async fn submit(
    State(state): State<SharedState>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> ApiResult<TaskKey> {
    let Json(body) = body?;
    let key = state
        .tasks
        .submit(body.cluster_id, &body.node_name, &body.request)
        .await?;
    ok(key)
}

/// GET /tasks/status
pub async fn status(
    State(state): State<SharedState>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> ApiResult<TaskStatus> {
    let Query(q) = query?;
    let key = state.tasks.resolve(q.cluster_id, q.node_name.as_ref(), &q.upid)?;
    ok(state.tasks.poll(&key).await?)
}

/// GET /tasks/log
pub async fn log(
    State(state): State<SharedState>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> ApiResult<Vec<TaskLogLine>> {
    let Query(q) = query?;
    let key = state.tasks.resolve(q.cluster_id, q.node_name.as_ref(), &q.upid)?;
    let lines = state
        .tasks
        .fetch_log(&key, q.start, q.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await?;
    ok(lines)
}

/// DELETE /tasks/stop
pub async fn stop(
    State(state): State<SharedState>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> ApiResult<TaskKey> {
    let Query(q) = query?;
    let key = state.tasks.resolve(q.cluster_id, q.node_name.as_ref(), &q.upid)?;
    state.tasks.cancel(&key).await?;
    ok(key)
}

/// GET /tasks/cluster
pub async fn list_cluster(
    State(state): State<SharedState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<Task>> {
    let Query(q) = query?;
    let tasks = state
        .tasks
        .list_tasks(q.cluster_id, q.node_name.as_ref(), &q.filter())
        .await?;
    ok(tasks)
}

/// GET /tasks/node
pub async fn list_node(
    State(state): State<SharedState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<Task>> {
    let Query(q) = query?;
    let node = q
        .node_name
        .as_ref()
        .ok_or_else(|| VgError::Validation("node_name is required".into()))?;
    let tasks = state
        .tasks
        .list_tasks(q.cluster_id, Some(node), &q.filter())
        .await?;
    ok(tasks)
}
