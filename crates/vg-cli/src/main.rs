//! vmgate CLI
//!
//! Client for a running vmgate orchestrator:
//! - Task status, log tailing, stop and listing
//! - Template sync listing, retry and re-sync
//! - Template and storage uploads
//! - Single-use console credentials

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vg_core::model::TaskFilter;
use vg_core::{ClusterId, ConsoleKind, NodeName, SyncStatus, SyncTaskId, TemplateId, Upid};
use vmgate::client::{ApiClient, TaskRef, TemplateForm, VolumeForm};
use vmgate::commands;
use vmgate::output::{print_error, print_success};

#[derive(Parser)]
#[command(name = "vmgate")]
#[command(author, version, about = "Hypervisor cluster coordination client")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Orchestrator address (overrides config)
    #[arg(short, long, global = true, env = "VMGATE_SERVER")]
    server: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the orchestrator is up
    Health,

    /// Inspect and control long-running node tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Inspect and retry template sync tasks
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Upload templates and storage files
    Upload {
        #[command(subcommand)]
        action: UploadAction,
    },

    /// Obtain a single-use console token for a node or VM
    Console {
        /// Cluster id
        #[arg(long)]
        cluster: u32,
        /// Node name
        #[arg(long)]
        node: String,
        /// Guest id; opens the node shell when omitted
        #[arg(long)]
        vmid: Option<u32>,
        /// Console kind (shell, terminal)
        #[arg(long, default_value = "shell")]
        kind: ConsoleKind,
        /// Print only the token
        #[arg(long)]
        token_only: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
struct TaskTarget {
    /// Cluster id
    #[arg(long)]
    cluster: u32,
    /// Node name; taken from the UPID when omitted
    #[arg(long)]
    node: Option<String>,
    /// Task UPID
    upid: String,
}

impl TaskTarget {
    fn task_ref(&self) -> TaskRef {
        TaskRef {
            cluster_id: ClusterId(self.cluster),
            node_name: self.node.as_deref().map(NodeName::new),
            upid: Upid::new(self.upid.clone()),
        }
    }
}

#[derive(Subcommand)]
enum TaskAction {
    /// Show a task's current status
    Status {
        #[command(flatten)]
        target: TaskTarget,
    },
    /// Print a task's log
    Log {
        #[command(flatten)]
        target: TaskTarget,
        /// First line to print
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Maximum lines to print (ignored with --follow)
        #[arg(long, default_value_t = 500)]
        limit: u64,
        /// Keep printing until the task stops
        #[arg(short, long)]
        follow: bool,
        /// Poll interval in milliseconds while following
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Ask the node to stop a task
    Stop {
        #[command(flatten)]
        target: TaskTarget,
    },
    /// List tasks of a cluster or node
    List {
        /// Cluster id
        #[arg(long)]
        cluster: u32,
        /// Only this node
        #[arg(long)]
        node: Option<String>,
        /// Only tasks of this type
        #[arg(long = "type")]
        task_type: Option<String>,
        /// Only tasks whose status contains this text
        #[arg(long)]
        status: Option<String>,
        /// Only tasks started at or after this Unix time
        #[arg(long)]
        since: Option<u64>,
        /// Maximum number of tasks
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// List sync tasks
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
        /// Only tasks of this template
        #[arg(long)]
        template: Option<u64>,
        /// Only tasks in this state (pending, syncing, completed, failed)
        #[arg(long)]
        status: Option<SyncStatus>,
    },
    /// Show one sync task
    Show { id: u64 },
    /// Retry a failed sync task
    Retry { id: u64 },
    /// Copy a template to more nodes
    Template {
        /// Template id
        id: u64,
        /// Target nodes
        #[arg(required = true)]
        nodes: Vec<String>,
    },
}

#[derive(Subcommand)]
enum UploadAction {
    /// Upload a template and fan it out across the cluster
    Template {
        /// File to upload
        file: PathBuf,
        /// Template name
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Cluster id
        #[arg(long)]
        cluster: u32,
        /// Storage id
        #[arg(long)]
        storage: u32,
        /// Node receiving the upload (first node of the cluster by default)
        #[arg(long)]
        node: Option<String>,
        /// Copy to other nodes once uploaded
        #[arg(long)]
        auto_sync: bool,
        /// Nodes to copy to (every other node by default)
        #[arg(long, value_delimiter = ',')]
        sync_nodes: Vec<String>,
        /// Checksum algorithm hint forwarded to the node
        #[arg(long)]
        hash: Option<String>,
    },
    /// Upload a file straight to a node's storage
    Volume {
        /// File to upload
        file: PathBuf,
        #[arg(long)]
        cluster: u32,
        #[arg(long)]
        node: String,
        /// Storage name
        #[arg(long)]
        storage: String,
        /// Content class (iso, vztmpl, backup, images, ...)
        #[arg(long)]
        content: String,
        #[arg(long)]
        hash: Option<String>,
    },
    /// List uploads in flight
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Config commands never touch the daemon
    let command = match cli.command {
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
                ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force)?,
                ConfigAction::Path => {
                    println!("{}", commands::config_path(cli.config.as_ref()).display())
                }
            }
            return Ok(());
        }
        other => other,
    };

    let mut config = commands::load_effective_config(cli.config.as_ref())?;
    if let Some(server) = cli.server {
        config.http_bind = server;
    }
    let client = ApiClient::from_config(&config)?;

    let result = run(&client, command).await;
    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
    }
    result
}

async fn run(client: &ApiClient, command: Commands) -> Result<()> {
    match command {
        Commands::Health => {
            client.health().await?;
            print_success(&format!("Orchestrator at {} is healthy", client.base_url()));
        }

        Commands::Task { action } => match action {
            TaskAction::Status { target } => {
                commands::task_status_command(client, &target.task_ref()).await?;
            }
            TaskAction::Log {
                target,
                start,
                limit,
                follow,
                interval_ms,
            } => {
                let follow = follow.then(|| Duration::from_millis(interval_ms));
                commands::task_log_command(client, &target.task_ref(), start, limit, follow).await?;
            }
            TaskAction::Stop { target } => {
                commands::task_stop_command(client, &target.task_ref()).await?;
            }
            TaskAction::List {
                cluster,
                node,
                task_type,
                status,
                since,
                limit,
            } => {
                let filter = TaskFilter {
                    task_type,
                    status,
                    since,
                    limit,
                };
                let node = node.as_deref().map(NodeName::new);
                commands::task_list_command(client, ClusterId(cluster), node.as_ref(), &filter).await?;
            }
        },

        Commands::Sync { action } => match action {
            SyncAction::List {
                page,
                page_size,
                template,
                status,
            } => {
                commands::sync_list_command(client, page, page_size, template.map(TemplateId), status)
                    .await?;
            }
            SyncAction::Show { id } => {
                commands::sync_show_command(client, SyncTaskId(id)).await?;
            }
            SyncAction::Retry { id } => {
                commands::sync_retry_command(client, SyncTaskId(id)).await?;
            }
            SyncAction::Template { id, nodes } => {
                let targets: Vec<NodeName> = nodes.iter().map(NodeName::new).collect();
                commands::sync_template_command(client, TemplateId(id), &targets).await?;
            }
        },

        Commands::Upload { action } => match action {
            UploadAction::Template {
                file,
                name,
                description,
                cluster,
                storage,
                node,
                auto_sync,
                sync_nodes,
                hash,
            } => {
                let form = TemplateForm {
                    template_name: name,
                    description,
                    cluster_id: cluster,
                    storage_id: storage,
                    node_name: node,
                    auto_sync,
                    sync_nodes,
                    hash_algorithm: hash,
                };
                commands::upload_template_command(client, &form, &file).await?;
            }
            UploadAction::Volume {
                file,
                cluster,
                node,
                storage,
                content,
                hash,
            } => {
                let form = VolumeForm {
                    cluster_id: cluster,
                    node_name: node,
                    storage,
                    content,
                    hash_algorithm: hash,
                };
                commands::upload_volume_command(client, &form, &file).await?;
            }
            UploadAction::List => {
                commands::uploads_command(client).await?;
            }
        },

        Commands::Console {
            cluster,
            node,
            vmid,
            kind,
            token_only,
        } => {
            commands::console_command(
                client,
                ClusterId(cluster),
                &NodeName::new(node),
                vmid,
                kind,
                token_only,
            )
            .await?;
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}
