//! Node client pool

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vg_core::auth::AuthContext;
use vg_core::config::{BackendKind, ClusterProfile, OrchestratorConfig};
use vg_core::error::ConfigError;
use vg_core::traits::NodeApi;
use vg_core::{ClusterId, NodeName, VgError};

use super::{HttpNode, InMemoryNode, SharedStorage};

/// Clients for every configured node, keyed by `(cluster, node)`
pub struct NodePool {
    /// Node clients
    nodes: DashMap<(ClusterId, NodeName), Arc<dyn NodeApi>>,
    /// Cluster profiles, for storage ids and node order
    clusters: DashMap<ClusterId, ClusterProfile>,
}

impl NodePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            clusters: DashMap::new(),
        }
    }

    /// Build clients for every cluster in the configuration
    pub fn from_config(config: &OrchestratorConfig, auth: Arc<AuthContext>) -> Result<Self, VgError> {
        let pool = Self::new();
        for cluster in &config.clusters {
            match cluster.backend {
                BackendKind::Http => {
                    for node in &cluster.nodes {
                        let client =
                            HttpNode::new(cluster, node, Arc::clone(&auth), config.control_timeout)?;
                        pool.register(cluster.id, Arc::new(client));
                    }
                }
                BackendKind::Memory => {
                    let shared = Arc::new(SharedStorage::default());
                    for node in &cluster.nodes {
                        let sim = InMemoryNode::in_cluster(&node.name, Arc::clone(&shared));
                        for storage in &cluster.storages {
                            sim.add_storage(&storage.name, storage.shared);
                        }
                        pool.register(cluster.id, Arc::new(sim));
                    }
                }
            }
            tracing::info!(
                cluster = %cluster.id,
                name = %cluster.name,
                nodes = cluster.nodes.len(),
                backend = ?cluster.backend,
                "Registered cluster"
            );
            pool.add_cluster(cluster.clone());
        }
        Ok(pool)
    }

    /// Register a cluster profile
    pub fn add_cluster(&self, profile: ClusterProfile) {
        self.clusters.insert(profile.id, profile);
    }

    /// Register a node client
    pub fn register(&self, cluster: ClusterId, node: Arc<dyn NodeApi>) {
        let name = node.node_name().clone();
        self.nodes.insert((cluster, name), node);
    }

    /// Get a node client
    pub fn get(&self, cluster: ClusterId, node: &NodeName) -> Result<Arc<dyn NodeApi>, VgError> {
        self.nodes
            .get(&(cluster, node.clone()))
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| {
                if self.clusters.contains_key(&cluster) {
                    VgError::NotFound(format!("node {} in cluster {}", node, cluster))
                } else {
                    VgError::NotFound(format!("cluster {}", cluster))
                }
            })
    }

    /// Profile of a cluster
    pub fn cluster(&self, cluster: ClusterId) -> Result<ClusterProfile, VgError> {
        self.clusters
            .get(&cluster)
            .map(|r| r.clone())
            .ok_or_else(|| VgError::NotFound(format!("cluster {}", cluster)))
    }

    /// Resolve a numeric storage id within a cluster
    pub fn storage_name(&self, cluster: ClusterId, storage_id: u32) -> Result<String, VgError> {
        let profile = self.cluster(cluster)?;
        match profile.storage_name(storage_id) {
            Ok(name) => Ok(name.to_string()),
            Err(ConfigError::Unknown { .. }) => Err(VgError::Validation(format!(
                "unknown storage id {} in cluster {}",
                storage_id, cluster
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Node clients of a cluster, in configured order
    pub fn nodes_in(&self, cluster: ClusterId) -> Result<Vec<Arc<dyn NodeApi>>, VgError> {
        let profile = self.cluster(cluster)?;
        let mut by_name: HashMap<NodeName, Arc<dyn NodeApi>> = self
            .nodes
            .iter()
            .filter(|r| r.key().0 == cluster)
            .map(|r| (r.key().1.clone(), Arc::clone(r.value())))
            .collect();
        Ok(profile
            .node_names()
            .into_iter()
            .filter_map(|name| by_name.remove(&name))
            .collect())
    }

    /// Number of node clients
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Await a node call under a deadline
pub(crate) async fn with_deadline<T, F>(operation: &str, after: Duration, fut: F) -> Result<T, VgError>
where
    F: std::future::Future<Output = Result<T, VgError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(VgError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab_pool() -> NodePool {
        let mut config = OrchestratorConfig::default();
        config
            .clusters
            .push(ClusterProfile::in_memory(1, "lab", &["pve1", "pve2", "pve3"]));
        NodePool::from_config(&config, Arc::new(AuthContext::new())).unwrap()
    }

    #[test]
    fn test_from_config_registers_memory_nodes() {
        let pool = lab_pool();
        assert_eq!(pool.len(), 3);
        let names: Vec<String> = pool
            .nodes_in(ClusterId(1))
            .unwrap()
            .iter()
            .map(|n| n.node_name().to_string())
            .collect();
        assert_eq!(names, vec!["pve1", "pve2", "pve3"]);
    }

    #[test]
    fn test_lookup_errors_name_the_missing_entity() {
        let pool = lab_pool();
        match pool.get(ClusterId(1), &NodeName::new("pve9")) {
            Err(VgError::NotFound(msg)) => assert!(msg.contains("pve9")),
            _ => panic!("expected NotFound"),
        }
        match pool.get(ClusterId(2), &NodeName::new("pve1")) {
            Err(VgError::NotFound(msg)) => assert_eq!(msg, "cluster 2"),
            _ => panic!("expected NotFound"),
        }
    }

    #[test]
    fn test_storage_ids_resolve() {
        let pool = lab_pool();
        assert_eq!(pool.storage_name(ClusterId(1), 1).unwrap(), "local");
        assert!(matches!(
            pool.storage_name(ClusterId(1), 42),
            Err(VgError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: Result<(), VgError> = with_deadline(
            "slow call",
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(VgError::Timeout { .. })));
    }
}
