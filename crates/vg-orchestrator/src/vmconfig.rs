//! Digest-guarded guest configuration writes
//!
//! Reads hand out a fingerprint of the config. A write carrying a
//! fingerprint is refused when the config has moved on since, so two editors
//! working from the same snapshot cannot silently overwrite each other.
//! Writes to one guest are serialised; different guests never wait on each
//! other.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use vg_core::digest::{config_digest, DIGEST_KEY};
use vg_core::traits::NodeApi;
use vg_core::{ClusterId, NodeName, VgError};

use crate::node::{with_deadline, NodePool};

/// A guest config together with its fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmConfigView {
    pub vmid: u32,
    pub digest: String,
    pub config: BTreeMap<String, Value>,
}

type GuestKey = (ClusterId, NodeName, u32);

/// Reads and writes guest configs
pub struct VmConfigService {
    nodes: Arc<NodePool>,
    /// Held only while a write is in flight
    locks: DashMap<GuestKey, Arc<Mutex<()>>>,
    control_timeout: Duration,
}

impl VmConfigService {
    pub fn new(nodes: Arc<NodePool>, control_timeout: Duration) -> Self {
        Self {
            nodes,
            locks: DashMap::new(),
            control_timeout,
        }
    }

    /// Current config and its digest
    pub async fn get(&self, cluster: ClusterId, node: &NodeName, vmid: u32) -> Result<VmConfigView, VgError> {
        let client = self.nodes.get(cluster, node)?;
        let (view, _) = self.read(client.as_ref(), vmid).await?;
        Ok(view)
    }

    /// Apply `changes`, refusing the write if `digest` is stale
    ///
    /// A `null` value deletes the key. Returns the config as it stands after
    /// the write, with its new digest.
    pub async fn update(
        &self,
        cluster: ClusterId,
        node: &NodeName,
        vmid: u32,
        changes: &BTreeMap<String, Value>,
        digest: Option<&str>,
    ) -> Result<VmConfigView, VgError> {
        if changes.is_empty() {
            return Err(VgError::Validation("no config changes given".into()));
        }
        if changes.contains_key(DIGEST_KEY) {
            return Err(VgError::Validation(
                "digest is passed alongside the changes, not inside them".into(),
            ));
        }

        let client = self.nodes.get(cluster, node)?;
        let key = (cluster, node.clone(), vmid);
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.write(client.as_ref(), vmid, changes, digest).await
        };
        drop(lock);
        self.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        let updated = result?;
        tracing::info!(
            cluster = %cluster,
            node = %node,
            vmid = vmid,
            digest = %updated.digest,
            "VM config updated"
        );
        Ok(updated)
    }

    /// Config with our digest, plus the node's own digest when it sent one
    async fn read(&self, client: &dyn NodeApi, vmid: u32) -> Result<(VmConfigView, Option<String>), VgError> {
        let mut config = with_deadline("read vm config", self.control_timeout, client.vm_config(vmid)).await?;
        let node_digest = match config.remove(DIGEST_KEY) {
            Some(Value::String(digest)) => Some(digest),
            _ => None,
        };
        let view = VmConfigView {
            vmid,
            digest: config_digest(&config),
            config,
        };
        Ok((view, node_digest))
    }

    /// The write itself, under the guest's lock
    ///
    /// The node's digest travels with the change so an edit that bypasses
    /// this service still turns the write into a `Conflict`.
    async fn write(
        &self,
        client: &dyn NodeApi,
        vmid: u32,
        changes: &BTreeMap<String, Value>,
        digest: Option<&str>,
    ) -> Result<VmConfigView, VgError> {
        let node_digest = match digest {
            Some(expected) => {
                let (current, node_digest) = self.read(client, vmid).await?;
                if current.digest != expected {
                    tracing::warn!(node = %client.node_name(), vmid = vmid, "Refusing stale config write");
                    return Err(conflict(vmid, expected, current.digest));
                }
                node_digest
            }
            None => None,
        };

        let written = with_deadline(
            "update vm config",
            self.control_timeout,
            client.update_vm_config(vmid, changes, node_digest.as_deref()),
        )
        .await;
        match written {
            Ok(()) => {}
            Err(VgError::Conflict { .. }) => {
                let (current, _) = self.read(client, vmid).await?;
                tracing::warn!(
                    node = %client.node_name(),
                    vmid = vmid,
                    "Config changed on the node between read and write"
                );
                return Err(conflict(vmid, digest.unwrap_or_default(), current.digest));
            }
            Err(e) => return Err(e),
        }

        let (updated, _) = self.read(client, vmid).await?;
        Ok(updated)
    }
}

fn conflict(vmid: u32, expected: &str, current: String) -> VgError {
    VgError::Conflict {
        resource: format!("vm/{}", vmid),
        expected: expected.to_string(),
        current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::InMemoryNode;
    use serde_json::json;
    use vg_core::config::ClusterProfile;

    fn setup() -> VmConfigService {
        setup_with_node().0
    }

    fn setup_with_node() -> (VmConfigService, Arc<InMemoryNode>) {
        let pool = Arc::new(NodePool::new());
        pool.add_cluster(ClusterProfile::in_memory(1, "lab", &["pve1"]));
        let node = Arc::new(InMemoryNode::new("pve1"));
        node.set_vm_config(
            100,
            BTreeMap::from([
                ("cores".to_string(), json!(2)),
                ("memory".to_string(), json!(2048)),
            ]),
        );
        pool.register(ClusterId(1), node.clone());
        (VmConfigService::new(pool, Duration::from_secs(5)), node)
    }

    fn changes(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_update_with_current_digest() {
        let svc = setup();
        let node = NodeName::new("pve1");
        let before = svc.get(ClusterId(1), &node, 100).await.unwrap();

        let after = svc
            .update(
                ClusterId(1),
                &node,
                100,
                &changes(&[("cores", json!(4)), ("memory", Value::Null)]),
                Some(&before.digest),
            )
            .await
            .unwrap();

        assert_ne!(after.digest, before.digest);
        assert_eq!(after.config.get("cores"), Some(&json!(4)));
        assert!(!after.config.contains_key("memory"));
    }

    #[tokio::test]
    async fn test_stale_digest_conflicts() {
        let svc = setup();
        let node = NodeName::new("pve1");
        let snapshot = svc.get(ClusterId(1), &node, 100).await.unwrap();

        // Another editor gets there first
        svc.update(ClusterId(1), &node, 100, &changes(&[("cores", json!(8))]), Some(&snapshot.digest))
            .await
            .unwrap();

        let err = svc
            .update(ClusterId(1), &node, 100, &changes(&[("cores", json!(1))]), Some(&snapshot.digest))
            .await
            .unwrap_err();
        match err {
            VgError::Conflict { resource, expected, .. } => {
                assert_eq!(resource, "vm/100");
                assert_eq!(expected, snapshot.digest);
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
        let current = svc.get(ClusterId(1), &node, 100).await.unwrap();
        assert_eq!(current.config.get("cores"), Some(&json!(8)));
    }

    #[tokio::test]
    async fn test_edit_on_node_between_read_and_write_conflicts() {
        let (svc, pve1) = setup_with_node();
        let node = NodeName::new("pve1");
        let snapshot = svc.get(ClusterId(1), &node, 100).await.unwrap();
        assert!(!snapshot.config.contains_key(DIGEST_KEY));

        pve1.edit_before_next_write("cores", json!(16));
        let err = svc
            .update(ClusterId(1), &node, 100, &changes(&[("cores", json!(4))]), Some(&snapshot.digest))
            .await
            .unwrap_err();
        match err {
            VgError::Conflict { expected, current, .. } => {
                assert_eq!(expected, snapshot.digest);
                assert_ne!(current, snapshot.digest);
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
        // The other editor's value survives
        let current = svc.get(ClusterId(1), &node, 100).await.unwrap();
        assert_eq!(current.config.get("cores"), Some(&json!(16)));
    }

    #[tokio::test]
    async fn test_write_locks_are_released() {
        let svc = setup();
        let node = NodeName::new("pve1");
        for cores in 1..4 {
            svc.update(ClusterId(1), &node, 100, &changes(&[("cores", json!(cores))]), None)
                .await
                .unwrap();
        }
        let _ = svc
            .update(ClusterId(1), &node, 999, &changes(&[("cores", json!(1))]), None)
            .await;
        assert!(svc.locks.is_empty());
    }

    #[tokio::test]
    async fn test_update_without_digest_is_unguarded() {
        let svc = setup();
        let node = NodeName::new("pve1");
        let view = svc
            .update(ClusterId(1), &node, 100, &changes(&[("onboot", json!(1))]), None)
            .await
            .unwrap();
        assert_eq!(view.config.get("onboot"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_rejects_empty_or_embedded_digest() {
        let svc = setup();
        let node = NodeName::new("pve1");
        assert!(matches!(
            svc.update(ClusterId(1), &node, 100, &BTreeMap::new(), None).await,
            Err(VgError::Validation(_))
        ));
        assert!(matches!(
            svc.update(ClusterId(1), &node, 100, &changes(&[("digest", json!("x"))]), None)
                .await,
            Err(VgError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_guest_is_remote_error() {
        let svc = setup();
        let err = svc.get(ClusterId(1), &NodeName::new("pve1"), 999).await.unwrap_err();
        assert!(matches!(err, VgError::RemoteApi { .. }));
    }
}
