//! vmgate Orchestrator Daemon
//!
//! Serves the HTTP API, the console tunnel listener and the console token
//! sweeper until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vg_core::api_token;
use vg_core::auth::AuthContext;
use vg_core::config::{self, OrchestratorConfig};
use vg_core::time::SystemClock;
use vg_orchestrator::console::{run_console_sweeper, TunnelServer};
use vg_orchestrator::node::{run_credential_reloader, NodePool};
use vg_orchestrator::{api, OrchestratorState};

#[derive(Parser)]
#[command(name = "vg-orchestrator")]
#[command(about = "vmgate orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Console tunnel bind address (overrides config)
    #[arg(long)]
    tunnel_bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("vmgate orchestrator starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                OrchestratorConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            OrchestratorConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        config.http_bind = bind;
    }
    if let Some(tunnel_bind) = args.tunnel_bind {
        config.tunnel_bind = tunnel_bind;
    }
    config.validate().context("Invalid configuration")?;

    if config.clusters.is_empty() {
        tracing::warn!("No clusters configured - every cluster lookup will fail");
    }

    // Node credentials and clients
    let auth = Arc::new(
        AuthContext::load(&config.credentials_path).context("Failed to load node credentials")?,
    );
    let nodes = Arc::new(
        NodePool::from_config(&config, Arc::clone(&auth)).context("Failed to set up node clients")?,
    );
    tracing::info!(
        "Configured {} clusters with {} nodes",
        config.clusters.len(),
        nodes.len()
    );

    // Fresh API token for this run
    let token = api_token::generate_token();
    api_token::write_token(&config.token_path, &token)
        .with_context(|| format!("Failed to write API token to {:?}", config.token_path))?;
    tracing::info!("API token written to {:?}", config.token_path);

    let http_bind = config.http_bind.clone();
    let tunnel_bind = config.tunnel_bind.clone();
    let sweep_interval = config.console_sweep_interval;
    let handshake_timeout = config.control_timeout;
    let token_path = config.token_path.clone();
    let credentials_path = config.credentials_path.clone();

    let state = Arc::new(OrchestratorState::new(
        config,
        Arc::clone(&auth),
        nodes,
        Arc::new(SystemClock),
        token,
    ));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    // Node credentials come back from disk after a node rejects them
    tokio::spawn(run_credential_reloader(auth, credentials_path, cancel.clone()));

    // Console token sweeper
    tokio::spawn(run_console_sweeper(
        Arc::clone(&state.consoles),
        sweep_interval,
        cancel.clone(),
    ));

    // Console tunnel listener
    let tunnel = TunnelServer::new(Arc::clone(&state.consoles), handshake_timeout, cancel.clone());
    let tunnel_cancel = cancel.clone();
    let tunnel_task = tokio::spawn(async move {
        if let Err(e) = tunnel.run(&tunnel_bind).await {
            tracing::error!("Console tunnel failed: {:#}", e);
            tunnel_cancel.cancel();
        }
    });

    // HTTP API
    let listener = TcpListener::bind(&http_bind)
        .await
        .with_context(|| format!("Failed to bind HTTP API to {}", http_bind))?;
    tracing::info!("HTTP API listening on {}", http_bind);

    let shutdown = cancel.clone();
    let served = axum::serve(listener, api::router(Arc::clone(&state)))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;

    cancel.cancel();
    let _ = tunnel_task.await;

    if let Err(e) = api_token::remove_token(&token_path) {
        tracing::warn!("Failed to remove API token file: {}", e);
    }

    served.context("HTTP API server failed")?;
    tracing::info!("Orchestrator shutdown complete");
    Ok(())
}
