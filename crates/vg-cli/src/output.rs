//! Output formatting utilities for the CLI
//!
//! Tables for task, sync task and upload listings, plus colored status
//! messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use vg_core::model::{Task, TaskStatus};
use vg_orchestrator::console::ConsoleGrant;
use vg_orchestrator::sync::{FanOutResult, SyncTaskView};
use vg_orchestrator::upload::{UploadOutcome, UploadSessionView};
use vg_protocol::ListPage;

/// Format node tasks as an ASCII table, newest first as the daemon returns them
pub fn format_tasks(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "No tasks".to_string();
    }

    #[derive(Tabled)]
    struct TaskRow {
        #[tabled(rename = "UPID")]
        upid: String,
        #[tabled(rename = "NODE")]
        node: String,
        #[tabled(rename = "TYPE")]
        task_type: String,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "USER")]
        user: String,
        #[tabled(rename = "STARTED")]
        started: u64,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let rows: Vec<TaskRow> = tasks
        .iter()
        .map(|t| TaskRow {
            upid: truncate(t.upid.as_str(), 48),
            node: t.node.clone(),
            task_type: t.task_type.clone(),
            id: t.id.clone().unwrap_or_else(|| "-".to_string()),
            user: t.user.clone(),
            started: t.starttime,
            status: t
                .status
                .clone()
                .unwrap_or_else(|| "running".to_string()),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(140))
        .to_string()
}

/// Format one task's status
pub fn format_task_status(status: &TaskStatus) -> String {
    let mut output = String::new();
    output.push_str(&format!("UPID: {}\n", status.upid));
    output.push_str(&format!("Node: {}\n", status.node));
    output.push_str(&format!("Type: {}\n", status.task_type));
    output.push_str(&format!("Status: {}\n", status.status));
    if let Some(exit) = &status.exitstatus {
        output.push_str(&format!("Exit status: {}\n", exit));
    }
    output
}

/// Format a page of sync tasks
pub fn format_sync_tasks(page: &ListPage<SyncTaskView>) -> String {
    if page.list.is_empty() {
        return "No sync tasks".to_string();
    }

    #[derive(Tabled)]
    struct SyncRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "TEMPLATE")]
        template: String,
        #[tabled(rename = "SOURCE")]
        source: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "STORAGE")]
        storage: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PROGRESS")]
        progress: String,
        #[tabled(rename = "ATTEMPTS")]
        attempts: u32,
    }

    let rows: Vec<SyncRow> = page
        .list
        .iter()
        .map(|t| SyncRow {
            id: t.task_id.to_string(),
            template: format!("{} ({})", t.template_name, t.template_id),
            source: t.source_node.to_string(),
            target: t.target_node.to_string(),
            storage: t.storage_name.clone(),
            status: t.status.to_string(),
            progress: format!("{}%", t.progress),
            attempts: t.attempts,
        })
        .collect();

    format!(
        "{}\nShowing {} of {}",
        Table::new(rows).with(Style::rounded()),
        page.list.len(),
        page.total
    )
}

/// Format one sync task in detail
pub fn format_sync_task(task: &SyncTaskView) -> String {
    let mut output = String::new();
    output.push_str(&format!("Sync task: {}\n", task.task_id));
    output.push_str(&format!(
        "Template: {} ({})\n",
        task.template_name, task.template_id
    ));
    output.push_str(&format!("Cluster: {}\n", task.cluster_id));
    output.push_str(&format!("Source: {}\n", task.source_node));
    output.push_str(&format!("Target: {}\n", task.target_node));
    output.push_str(&format!("Storage: {}\n", task.storage_name));
    output.push_str(&format!("Status: {} ({}%)\n", task.status, task.progress));
    output.push_str(&format!("Attempts: {}\n", task.attempts));
    if let Some(error) = &task.error_message {
        output.push_str(&format!("Error: {}\n", error));
    }
    output
}

/// Format the result of a template upload or import
pub fn format_fan_out(result: &FanOutResult) -> String {
    let mut output = String::new();
    output.push_str(&format!("Template: {}\n", result.template_id));
    output.push_str(&format!("Primary copy: {} on {}\n", result.primary_copy, result.import_node));
    output.push_str(&format!(
        "Storage: {}{}\n",
        result.storage_type,
        if result.is_shared { " (shared)" } else { "" }
    ));
    if result.sync_tasks.is_empty() {
        output.push_str("No sync tasks\n");
    } else {
        output.push_str(&format!(
            "Sync tasks: {}\n",
            format_sync_tasks(&ListPage::from_vec(result.sync_tasks.clone()))
        ));
    }
    output
}

/// Format a finished storage upload
pub fn format_upload(outcome: &UploadOutcome) -> String {
    let mut output = format!("Uploaded {} bytes as {}\n", outcome.bytes, outcome.volid);
    if let Some(upid) = outcome.upid() {
        output.push_str(&format!("Import task: {}\n", upid));
    }
    output
}

/// Format in-flight uploads
pub fn format_uploads(uploads: &[UploadSessionView]) -> String {
    if uploads.is_empty() {
        return "No uploads in flight".to_string();
    }

    #[derive(Tabled)]
    struct UploadRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NODE")]
        node: String,
        #[tabled(rename = "STORAGE")]
        storage: String,
        #[tabled(rename = "FILE")]
        filename: String,
        #[tabled(rename = "BYTES")]
        bytes: String,
    }

    let rows: Vec<UploadRow> = uploads
        .iter()
        .map(|u| UploadRow {
            id: truncate(&u.upload_id, 12),
            node: format!("{}/{}", u.cluster_id, u.node_name),
            storage: format!("{} ({})", u.storage, u.content),
            filename: u.filename.clone(),
            bytes: match u.size {
                Some(size) => format!("{}/{}", u.bytes, size),
                None => u.bytes.to_string(),
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a console credential
pub fn format_grant(grant: &ConsoleGrant) -> String {
    let mut output = String::new();
    output.push_str(&format!("Session: {}\n", grant.session_id));
    output.push_str(&format!("Target: {} ({})\n", grant.target, grant.kind));
    output.push_str(&format!("Tunnel: {}\n", grant.endpoint));
    output.push_str(&format!("Token: {}\n", grant.token));
    output.push_str(&format!("Expires at: {} (unix ms)\n", grant.expires_at));
    output
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("UPID:pve1:0000ABCD", 10), "UPID:pv...");
    }

    #[test]
    fn test_empty_listings() {
        assert_eq!(format_tasks(&[]), "No tasks");
        assert_eq!(format_uploads(&[]), "No uploads in flight");
        assert_eq!(format_sync_tasks(&ListPage::default()), "No sync tasks");
    }
}
