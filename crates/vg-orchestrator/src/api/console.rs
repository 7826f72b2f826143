//! Console session endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use vg_core::model::ConsoleAuth;
use vg_core::{ClusterId, ConsoleKind, ConsoleTarget, NodeName};

use super::{ok, ApiResult, SharedState};
use crate::console::{ConsoleGrant, ConsoleRequest};

#[derive(Debug, Deserialize)]
pub struct NodeConsoleBody {
    cluster_id: ClusterId,
    node_name: NodeName,
    kind: ConsoleKind,
    #[serde(default)]
    auth: Option<ConsoleAuth>,
}

#[derive(Debug, Deserialize)]
pub struct VmConsoleBody {
    cluster_id: ClusterId,
    node_name: NodeName,
    vmid: u32,
    kind: ConsoleKind,
    #[serde(default)]
    auth: Option<ConsoleAuth>,
}

/// POST /nodes/console
pub async fn node_console(
    State(state): State<SharedState>,
    body: Result<Json<NodeConsoleBody>, JsonRejection>,
) -> ApiResult<ConsoleGrant> {
    let Json(body) = body?;
    let grant = state
        .consoles
        .create_session(ConsoleRequest {
            cluster_id: body.cluster_id,
            node_name: body.node_name,
            target: ConsoleTarget::Node,
            kind: body.kind,
            auth: body.auth,
        })
        .await?;
    ok(grant)
}

/// POST /vms/console
pub async fn vm_console(
    State(state): State<SharedState>,
    body: Result<Json<VmConsoleBody>, JsonRejection>,
) -> ApiResult<ConsoleGrant> {
    let Json(body) = body?;
    let grant = state
        .consoles
        .create_session(ConsoleRequest {
            cluster_id: body.cluster_id,
            node_name: body.node_name,
            target: ConsoleTarget::Vm { vmid: body.vmid },
            kind: body.kind,
            auth: body.auth,
        })
        .await?;
    ok(grant)
}
