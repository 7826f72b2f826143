//! Task commands

use std::time::Duration;

use anyhow::Result;

use vg_core::model::TaskFilter;
use vg_core::{ClusterId, NodeName};

use crate::client::{ApiClient, TaskRef};
use crate::output::{format_task_status, format_tasks, print_error, print_success, print_warning};

/// Show one task's status
pub async fn task_status_command(client: &ApiClient, task: &TaskRef) -> Result<()> {
    let status = match client.task_status(task).await {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to get task status: {}", e));
            return Err(e);
        }
    };
    print!("{}", format_task_status(&status));
    Ok(())
}

/// Print a task's log, optionally following it until the task stops
pub async fn task_log_command(
    client: &ApiClient,
    task: &TaskRef,
    start: u64,
    limit: u64,
    follow: Option<Duration>,
) -> Result<()> {
    let Some(interval) = follow else {
        for line in client.task_log(task, start, limit).await? {
            println!("{}", line.t);
        }
        return Ok(());
    };

    let status = client
        .follow_log(task, start, interval, |line| println!("{}", line.t))
        .await?;
    if status.succeeded() {
        print_success(&format!(
            "Task finished: {}",
            status.exitstatus.as_deref().unwrap_or("OK")
        ));
        return Ok(());
    }
    match status.exitstatus.as_deref() {
        Some(exit) => {
            print_error(&format!("Task failed: {}", exit));
            anyhow::bail!("task {} failed", task.upid);
        }
        None => print_warning("Task stopped without an exit status"),
    }
    Ok(())
}

/// Ask the node to stop a task
pub async fn task_stop_command(client: &ApiClient, task: &TaskRef) -> Result<()> {
    let key = client.stop_task(task).await?;
    print_success(&format!("Stop requested for {}", key));
    Ok(())
}

/// List tasks of a cluster or one node
pub async fn task_list_command(
    client: &ApiClient,
    cluster: ClusterId,
    node: Option<&NodeName>,
    filter: &TaskFilter,
) -> Result<()> {
    let tasks = match client.list_tasks(cluster, node, filter).await {
        Ok(t) => t,
        Err(e) => {
            print_error(&format!("Failed to list tasks: {}", e));
            return Err(e);
        }
    };
    println!("{}", format_tasks(&tasks));
    Ok(())
}
