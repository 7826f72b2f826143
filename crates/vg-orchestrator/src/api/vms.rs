//! Guest config endpoints

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use vg_core::{ClusterId, NodeName};

use super::{ok, ApiResult, SharedState};
use crate::vmconfig::VmConfigView;

#[derive(Debug, Deserialize)]
pub struct VmQuery {
    cluster_id: ClusterId,
    node_name: NodeName,
    vmid: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    cluster_id: ClusterId,
    node_name: NodeName,
    vmid: u32,
    changes: BTreeMap<String, Value>,
    /// Digest from the last read; omitted means an unguarded write
    #[serde(default)]
    digest: Option<String>,
}

/// GET /vms/config
pub async fn get_config(
    State(state): State<SharedState>,
    query: Result<Query<VmQuery>, QueryRejection>,
) -> ApiResult<VmConfigView> {
    let Query(q) = query?;
    ok(state.vm_configs.get(q.cluster_id, &q.node_name, q.vmid).await?)
}

/// PUT /vms/config
pub async fn update_config(
    State(state): State<SharedState>,
    body: Result<Json<UpdateBody>, JsonRejection>,
) -> ApiResult<VmConfigView> {
    let Json(body) = body?;
    let view = state
        .vm_configs
        .update(
            body.cluster_id,
            &body.node_name,
            body.vmid,
            &body.changes,
            body.digest.as_deref(),
        )
        .await?;
    ok(view)
}
