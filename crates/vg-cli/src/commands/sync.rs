//! Template sync commands

use anyhow::Result;

use vg_core::{NodeName, SyncStatus, SyncTaskId, TemplateId};

use crate::client::ApiClient;
use crate::output::{format_sync_task, format_sync_tasks, print_info, print_success};

/// List sync tasks, one page at a time
pub async fn sync_list_command(
    client: &ApiClient,
    page: usize,
    page_size: usize,
    template_id: Option<TemplateId>,
    status: Option<SyncStatus>,
) -> Result<()> {
    let listing = client
        .list_sync_tasks(page, page_size, template_id, status)
        .await?;
    println!("{}", format_sync_tasks(&listing));
    Ok(())
}

/// Show one sync task
pub async fn sync_show_command(client: &ApiClient, id: SyncTaskId) -> Result<()> {
    let task = client.sync_task(id).await?;
    print!("{}", format_sync_task(&task));
    Ok(())
}

/// Retry a failed sync task
pub async fn sync_retry_command(client: &ApiClient, id: SyncTaskId) -> Result<()> {
    let task = client.retry_sync_task(id).await?;
    print_success(&format!(
        "Sync task {} restarted (attempt {})",
        task.task_id,
        task.attempts + 1
    ));
    Ok(())
}

/// Fan a template out to more nodes
pub async fn sync_template_command(
    client: &ApiClient,
    template_id: TemplateId,
    targets: &[NodeName],
) -> Result<()> {
    let tasks = client.sync_template(template_id, targets).await?;
    if tasks.is_empty() {
        print_info("Nothing to sync");
        return Ok(());
    }
    for task in &tasks {
        print_success(&format!(
            "Sync task {}: {} -> {} ({})",
            task.task_id, task.source_node, task.target_node, task.status
        ));
    }
    Ok(())
}
