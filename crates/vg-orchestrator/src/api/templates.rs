//! Template upload, import and sync endpoints

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use serde::Deserialize;

use vg_core::{ClusterId, NodeName, SyncTaskId, TemplateId};
use vg_protocol::ListPage;

use super::form::{body_channel, feed, missing_file, FormFields};
use super::{ok, ApiResult, SharedState};
use crate::sync::{FanOutResult, SyncTaskQuery, SyncTaskView, Template, TemplateImport, TemplateUpload};

const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct SyncBody {
    target_nodes: Vec<NodeName>,
}

/// Comma separated node list; blanks are dropped
fn node_list(raw: Option<&str>) -> Vec<NodeName> {
    raw.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(NodeName::new)
            .collect()
    })
    .unwrap_or_default()
}

/// POST /templates/upload
pub async fn upload(State(state): State<SharedState>, mut multipart: Multipart) -> ApiResult<FanOutResult> {
    let mut fields = FormFields::default();
    let file = loop {
        let field = multipart
            .next_field()
            .await?
            .ok_or_else(|| missing_file(FILE_FIELD))?;
        if let Some(file) = fields.take(field, FILE_FIELD).await? {
            break file;
        }
    };

    let filename = file.file_name().unwrap_or_default().to_string();
    let upload = TemplateUpload {
        name: fields.required("template_name")?.to_string(),
        description: fields.optional("description").map(str::to_string),
        cluster_id: ClusterId(fields.parse("cluster_id")?),
        storage_id: fields.parse("storage_id")?,
        filename,
        size: fields.parse_optional("size")?,
        checksum_algorithm: fields.parse_optional("hash_algorithm")?,
        auto_sync: fields.flag("auto_sync"),
        sync_nodes: node_list(fields.optional("sync_nodes")),
        import_node: fields.optional("node_name").map(NodeName::new),
    };

    let (tx, body) = body_channel();
    let (_, result) = tokio::join!(
        feed(file, tx),
        state.sync.initiate_upload(upload, body, None)
    );
    ok(result?)
}

/// POST /templates/import
pub async fn import(
    State(state): State<SharedState>,
    body: Result<Json<TemplateImport>, JsonRejection>,
) -> ApiResult<FanOutResult> {
    let Json(import) = body?;
    ok(state.sync.import_from_backup(import).await?)
}

/// GET /templates/:id
pub async fn get_template(
    State(state): State<SharedState>,
    id: Result<Path<TemplateId>, PathRejection>,
) -> ApiResult<Template> {
    let Path(id) = id?;
    ok(state.sync.template(id)?)
}

/// POST /templates/:id/sync
pub async fn sync(
    State(state): State<SharedState>,
    id: Result<Path<TemplateId>, PathRejection>,
    body: Result<Json<SyncBody>, JsonRejection>,
) -> ApiResult<Vec<SyncTaskView>> {
    let Path(id) = id?;
    let Json(body) = body?;
    ok(state.sync.sync(id, body.target_nodes)?)
}

/// GET /templates/sync-tasks
pub async fn list_sync_tasks(
    State(state): State<SharedState>,
    query: Result<Query<SyncTaskQuery>, QueryRejection>,
) -> ApiResult<ListPage<SyncTaskView>> {
    let Query(query) = query?;
    ok(state.sync.list_sync_tasks(&query)?)
}

/// GET /templates/sync-tasks/:task_id
pub async fn get_sync_task(
    State(state): State<SharedState>,
    id: Result<Path<SyncTaskId>, PathRejection>,
) -> ApiResult<SyncTaskView> {
    let Path(id) = id?;
    ok(state.sync.get_sync_task(id)?)
}

/// POST /templates/sync-tasks/:task_id/retry
pub async fn retry_sync_task(
    State(state): State<SharedState>,
    id: Result<Path<SyncTaskId>, PathRejection>,
) -> ApiResult<SyncTaskView> {
    let Path(id) = id?;
    ok(state.sync.retry(id)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_list() {
        assert_eq!(
            node_list(Some("pve2, pve3,,")),
            vec![NodeName::new("pve2"), NodeName::new("pve3")]
        );
        assert!(node_list(None).is_empty());
    }
}
