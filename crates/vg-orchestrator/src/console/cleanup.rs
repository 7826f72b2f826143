//! Console session sweeper
//!
//! Moves tokens that outlived their expiry to `expired` without waiting for
//! someone to present them, and forgets consumed or expired sessions once
//! the retention window has passed. Until then a reused token is still
//! refused with its precise reason.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::ConsoleBroker;

/// Run the sweeper until cancelled
pub async fn run_console_sweeper(
    broker: Arc<ConsoleBroker>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    tracing::info!("Starting console sweeper (interval: {:?})", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = broker.sweep();
                if stats.expired > 0 {
                    tracing::info!("Expired {} unused console tokens", stats.expired);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Console sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{InMemoryNode, NodePool};
    use crate::console::ConsoleRequest;
    use vg_core::config::{ClusterProfile, OrchestratorConfig};
    use vg_core::time::ManualClock;
    use vg_core::{ClusterId, ConsoleKind, ConsoleTarget, NodeName, VgError};

    #[tokio::test]
    async fn test_sweeper_expires_in_background() {
        let pool = Arc::new(NodePool::new());
        pool.add_cluster(ClusterProfile::in_memory(1, "lab", &["pve1"]));
        let node = Arc::new(InMemoryNode::new("pve1"));
        node.set_console_upstream("127.0.0.1:5900".parse().unwrap());
        pool.register(ClusterId(1), node);
        let clock = Arc::new(ManualClock::new(0));
        let broker = Arc::new(ConsoleBroker::new(pool, &OrchestratorConfig::default(), clock.clone()));

        let grant = broker
            .create_session(ConsoleRequest {
                cluster_id: ClusterId(1),
                node_name: NodeName::new("pve1"),
                target: ConsoleTarget::Node,
                kind: ConsoleKind::Shell,
                auth: None,
            })
            .await
            .unwrap();
        clock.advance(Duration::from_secs(121));

        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(run_console_sweeper(
            Arc::clone(&broker),
            Duration::from_millis(5),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        sweeper.await.unwrap();

        let err = broker.consume(&grant.token).unwrap_err();
        assert!(matches!(err, VgError::TokenExpired { .. }));
    }
}
