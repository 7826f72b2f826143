//! Upload commands

use std::path::Path;

use anyhow::Result;

use crate::client::{ApiClient, TemplateForm, VolumeForm};
use crate::output::{format_fan_out, format_upload, format_uploads, print_info, print_success};

/// Upload a template and report its fan-out
pub async fn upload_template_command(client: &ApiClient, form: &TemplateForm, path: &Path) -> Result<()> {
    print_info(&format!("Uploading {:?} as template '{}'...", path, form.template_name));
    let result = client.upload_template(form, path).await?;
    print_success("Template uploaded");
    print!("{}", format_fan_out(&result));
    Ok(())
}

/// Upload a file to one node's storage
pub async fn upload_volume_command(client: &ApiClient, form: &VolumeForm, path: &Path) -> Result<()> {
    print_info(&format!(
        "Uploading {:?} to {}:{} on {}...",
        path, form.storage, form.content, form.node_name
    ));
    let outcome = client.upload_volume(form, path).await?;
    print!("{}", format_upload(&outcome));
    Ok(())
}

/// Show uploads still in flight
pub async fn uploads_command(client: &ApiClient) -> Result<()> {
    let uploads = client.list_uploads().await?;
    println!("{}", format_uploads(&uploads));
    Ok(())
}
