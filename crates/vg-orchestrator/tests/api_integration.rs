//! HTTP API driven through the router without a socket

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

use vg_core::auth::AuthContext;
use vg_core::config::{ClusterProfile, OrchestratorConfig};
use vg_core::time::SystemClock;
use vg_core::ClusterId;
use vg_orchestrator::api;
use vg_orchestrator::node::{InMemoryNode, NodePool};
use vg_orchestrator::OrchestratorState;

const TOKEN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
const BOUNDARY: &str = "vmgate-test-boundary";

fn app() -> (Router, Arc<InMemoryNode>) {
    let config = OrchestratorConfig::default();
    let pool = Arc::new(NodePool::new());
    pool.add_cluster(ClusterProfile::in_memory(1, "lab", &["pve1"]));
    let node = Arc::new(InMemoryNode::new("pve1"));
    node.set_console_upstream("127.0.0.1:5900".parse().unwrap());
    node.set_vm_config(
        101,
        BTreeMap::from([("cores".to_string(), json!(2)), ("name".to_string(), json!("web"))]),
    );
    pool.register(ClusterId(1), node.clone());

    let state = Arc::new(OrchestratorState::new(
        config,
        Arc::new(AuthContext::new()),
        pool,
        Arc::new(SystemClock),
        TOKEN.to_string(),
    ));
    (api::router(state), node)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn multipart(uri: &str, fields: &[(&str, &str)], filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn encode(value: &str) -> String {
    value.replace(':', "%3A").replace('@', "%40")
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let (app, _) = app();
    let req = Request::builder()
        .uri("/api/v1/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_token_required() {
    let (app, _) = app();
    let req = Request::builder()
        .uri("/api/v1/uploads")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
    assert!(body["data"].is_null());

    let req = Request::builder()
        .uri("/api/v1/uploads")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_submit_then_poll_and_read_log() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/tasks",
            Some(json!({
                "cluster_id": 1,
                "node_name": "pve1",
                "op": "vm_create",
                "vmid": 100,
                "config": {"cores": 2}
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let upid = body["data"]["upid"].as_str().unwrap().to_string();
    assert!(upid.starts_with("UPID:pve1:"));

    // No node name: routed by the UPID
    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/api/v1/tasks/status?cluster_id=1&upid={}", encode(&upid)),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["upid"], upid.as_str());

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!(
                "/api/v1/tasks/log?cluster_id=1&node_name=pve1&upid={}&start=0&limit=10",
                encode(&upid)
            ),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let lines = body["data"].as_array().unwrap();
    assert!(!lines.is_empty());
    assert_eq!(lines[0]["n"], 0);

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/v1/tasks/node?cluster_id=1&node_name=pve1", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_submit_is_validation_error() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/tasks",
            Some(json!({"cluster_id": 1, "node_name": "pve1", "op": "disk_wipe", "disk": "sda"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/tasks")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_unknown_node_is_not_found() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/v1/tasks/node?cluster_id=1&node_name=pve9", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("pve9"));
}

#[tokio::test]
async fn test_storage_upload_streams_file() {
    let (app, node) = app();
    let (status, body) = send(
        &app,
        multipart(
            "/api/v1/nodes/storage/upload",
            &[
                ("cluster_id", "1"),
                ("node_name", "pve1"),
                ("storage", "local"),
                ("content", "iso"),
                ("hash_algorithm", "sha256"),
            ],
            "alpine.iso",
            b"iso-bytes",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["volid"], "local:iso/alpine.iso");
    assert_eq!(body["data"]["bytes"], 9);
    assert_eq!(
        node.volume("local:iso/alpine.iso").as_deref(),
        Some(&b"iso-bytes"[..])
    );

    let (_, body) = send(&app, request(Method::GET, "/api/v1/uploads", None)).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_upload_without_file_is_rejected() {
    let (app, _) = app();
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"cluster_id\"\r\n\r\n1\r\n--{b}--\r\n",
        b = BOUNDARY
    )
    .into_bytes();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/nodes/storage/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn test_template_upload_on_single_node_cluster() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        multipart(
            "/api/v1/templates/upload",
            &[
                ("template_name", "alpine"),
                ("cluster_id", "1"),
                ("storage_id", "1"),
                ("auto_sync", "true"),
            ],
            "alpine-3.19.tar.xz",
            b"rootfs",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["is_shared"], false);
    assert_eq!(body["data"]["primary_copy"], "local:vztmpl/alpine-3.19.tar.xz");
    // The only node is the primary
    assert_eq!(body["data"]["sync_tasks"], json!([]));

    let id = body["data"]["template_id"].as_u64().unwrap();
    let (status, body) = send(
        &app,
        request(Method::GET, &format!("/api/v1/templates/{}", id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "alpine");
}

#[tokio::test]
async fn test_sync_task_endpoints() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/v1/templates/sync-tasks?page=1&page_size=10", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"total": 0, "list": []}));

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/v1/templates/sync-tasks?page=0", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/v1/templates/sync-tasks/42/retry", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn test_vm_config_digest_guard() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        request(
            Method::GET,
            "/api/v1/vms/config?cluster_id=1&node_name=pve1&vmid=101",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let digest = body["data"]["digest"].as_str().unwrap().to_string();

    let update = |cores: u32, digest: &str| {
        request(
            Method::PUT,
            "/api/v1/vms/config",
            Some(json!({
                "cluster_id": 1,
                "node_name": "pve1",
                "vmid": 101,
                "changes": {"cores": cores},
                "digest": digest
            })),
        )
    };

    let (status, body) = send(&app, update(4, &digest)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_ne!(body["data"]["digest"], digest.as_str());
    assert_eq!(body["data"]["config"]["cores"], 4);

    let (status, body) = send(&app, update(8, &digest)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 409);
}

#[tokio::test]
async fn test_console_sessions() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/nodes/console",
            Some(json!({"cluster_id": 1, "node_name": "pve1", "kind": "shell"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["token"].as_str().unwrap().len(), 64);
    assert_eq!(body["data"]["endpoint"], "127.0.0.1:8751");
    assert_eq!(body["data"]["target"], json!({"target": "node"}));

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/nodes/console",
            Some(json!({"cluster_id": 1, "node_name": "pve1", "kind": "terminal"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/v1/vms/console",
            Some(json!({"cluster_id": 1, "node_name": "pve1", "vmid": 101, "kind": "shell"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["target"]["vmid"], 101);
}
