//! Console credential command

use anyhow::Result;

use vg_core::{ClusterId, ConsoleKind, NodeName};

use crate::client::ApiClient;
use crate::output::{format_grant, print_warning};

/// Obtain a single-use console token for a node or guest
pub async fn console_command(
    client: &ApiClient,
    cluster: ClusterId,
    node: &NodeName,
    vmid: Option<u32>,
    kind: ConsoleKind,
    token_only: bool,
) -> Result<()> {
    let grant = client.create_console(cluster, node, vmid, kind).await?;
    if token_only {
        println!("{}", grant.token);
        return Ok(());
    }
    print!("{}", format_grant(&grant));
    print_warning("The token opens exactly one tunnel connection");
    Ok(())
}
