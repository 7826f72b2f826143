//! Client against a live orchestrator API on loopback
//!
//! The daemon runs in-process over simulated nodes; the client and the
//! `vmgate` binary talk to it over real HTTP.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tokio::net::TcpListener;

use vg_core::auth::AuthContext;
use vg_core::config::{ClusterProfile, OrchestratorConfig};
use vg_core::model::{TaskFilter, TaskRequest};
use vg_core::time::SystemClock;
use vg_core::{ClusterId, ConsoleKind, NodeName};
use vg_orchestrator::node::{InMemoryNode, NodePool};
use vg_orchestrator::{api, OrchestratorState};
use vmgate::client::{ApiClient, TaskRef, VolumeForm};

const TOKEN: &str = "f00dfacef00dfacef00dfacef00dfacef00dfacef00dfacef00dfacef00dface";

struct Daemon {
    state: Arc<OrchestratorState>,
    addr: String,
}

async fn start_daemon() -> Daemon {
    let pool = Arc::new(NodePool::new());
    pool.add_cluster(ClusterProfile::in_memory(1, "lab", &["pve1", "pve2"]));
    for name in ["pve1", "pve2"] {
        let node = Arc::new(InMemoryNode::new(name));
        node.set_console_upstream("127.0.0.1:5900".parse().unwrap());
        pool.register(ClusterId(1), node);
    }

    let state = Arc::new(OrchestratorState::new(
        OrchestratorConfig::default(),
        Arc::new(AuthContext::new()),
        pool,
        Arc::new(SystemClock),
        TOKEN.to_string(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let router = api::router(Arc::clone(&state));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    Daemon { state, addr }
}

#[tokio::test]
async fn test_follow_log_until_task_stops() {
    let daemon = start_daemon().await;
    let client = ApiClient::new(&daemon.addr, TOKEN).unwrap();

    let key = daemon
        .state
        .tasks
        .submit(
            ClusterId(1),
            &NodeName::new("pve1"),
            &TaskRequest::VmCreate {
                vmid: 120,
                config: BTreeMap::new(),
            },
        )
        .await
        .unwrap();

    let task = TaskRef {
        cluster_id: ClusterId(1),
        node_name: None,
        upid: key.upid.clone(),
    };
    let mut lines = Vec::new();
    let status = client
        .follow_log(&task, 0, Duration::from_millis(10), |line| {
            lines.push(line.clone())
        })
        .await
        .unwrap();

    assert!(status.succeeded(), "{:?}", status);
    assert!(lines[0].t.starts_with("starting"));
    // Gapless and in order
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line.n, i as u64);
    }

    let listed = client
        .list_tasks(ClusterId(1), None, &TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_remote_failures_surface_message() {
    let daemon = start_daemon().await;
    let client = ApiClient::new(&daemon.addr, TOKEN).unwrap();

    let err = client
        .retry_sync_task(vg_core::SyncTaskId(7))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"), "{}", err);

    let wrong = ApiClient::new(&daemon.addr, "nope").unwrap();
    let err = wrong.list_uploads().await.unwrap_err();
    assert!(err.to_string().contains("401"), "{}", err);

    // Health needs no token at all
    assert!(wrong.health().await.is_ok());
}

#[tokio::test]
async fn test_volume_upload_and_console() {
    let daemon = start_daemon().await;
    let client = ApiClient::new(&daemon.addr, TOKEN).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tools.iso");
    std::fs::write(&path, vec![7u8; 64 * 1024]).unwrap();

    let outcome = client
        .upload_volume(
            &VolumeForm {
                cluster_id: 1,
                node_name: "pve2".to_string(),
                storage: "local".to_string(),
                content: "iso".to_string(),
                hash_algorithm: None,
            },
            &path,
        )
        .await
        .unwrap();
    assert_eq!(outcome.volid, "local:iso/tools.iso");
    assert_eq!(outcome.bytes, 64 * 1024);
    assert!(client.list_uploads().await.unwrap().is_empty());

    let grant = client
        .create_console(ClusterId(1), &NodeName::new("pve1"), None, ConsoleKind::Shell)
        .await
        .unwrap();
    assert_eq!(grant.token.len(), 64);

    let page = client.list_sync_tasks(1, 10, None, None).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_lists_tasks() {
    let daemon = start_daemon().await;
    daemon
        .state
        .tasks
        .submit(
            ClusterId(1),
            &NodeName::new("pve2"),
            &TaskRequest::VmCreate {
                vmid: 130,
                config: BTreeMap::new(),
            },
        )
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("api_token");
    std::fs::write(&token_path, TOKEN).unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "http_bind = \"{}\"\ntoken_path = \"{}\"\n",
            daemon.addr,
            token_path.display()
        ),
    )
    .unwrap();

    let output = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("vmgate")
            .unwrap()
            .args(["--config"])
            .arg(&config_path)
            .args(["task", "list", "--cluster", "1", "--node", "pve2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("qmcreate"))
            .get_output()
            .clone()
    })
    .await
    .unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("130"));
}
