//! Cluster profile configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;
use crate::types::{ClusterId, NodeName};

/// How the orchestrator talks to a cluster's nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Node HTTP API
    #[default]
    Http,
    /// Simulated in-process nodes
    Memory,
}

/// One node of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Node name as the cluster knows it
    pub name: String,

    /// Base URL of the node API, e.g. `https://10.0.0.11:8006/api2/json`
    #[serde(default)]
    pub api_url: String,

    /// Host console ports are reachable on (defaults to the API host)
    #[serde(default)]
    pub console_host: Option<String>,
}

impl NodeProfile {
    /// Host that console tunnels should dial
    pub fn console_host(&self) -> String {
        if let Some(host) = &self.console_host {
            return host.clone();
        }
        let without_scheme = self
            .api_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.api_url);
        let authority = without_scheme.split('/').next().unwrap_or_default();
        let host = match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => authority,
        };
        if host.is_empty() {
            "127.0.0.1".to_string()
        } else {
            host.to_string()
        }
    }
}

/// A storage known by numeric id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProfile {
    /// Numeric id clients refer to
    pub id: u32,
    /// Storage name on the nodes
    pub name: String,
    /// Whether the storage is shared (only read by the in-memory backend;
    /// HTTP nodes report this themselves)
    #[serde(default)]
    pub shared: bool,
}

/// Profile for a known cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProfile {
    /// Numeric id
    pub id: ClusterId,

    /// Human-readable name
    pub name: String,

    /// Backend used to reach the nodes
    #[serde(default)]
    pub backend: BackendKind,

    /// Whether to verify node TLS certificates
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Nodes in the cluster
    #[serde(default)]
    pub nodes: Vec<NodeProfile>,

    /// Storages addressable by numeric id
    #[serde(default)]
    pub storages: Vec<StorageProfile>,
}

fn default_verify_tls() -> bool {
    true
}

impl ClusterProfile {
    /// Profile for a simulated cluster with the given nodes and a `local` storage
    pub fn in_memory(id: u32, name: &str, nodes: &[&str]) -> Self {
        Self {
            id: ClusterId(id),
            name: name.to_string(),
            backend: BackendKind::Memory,
            verify_tls: true,
            nodes: nodes
                .iter()
                .map(|n| NodeProfile {
                    name: (*n).to_string(),
                    api_url: String::new(),
                    console_host: None,
                })
                .collect(),
            storages: vec![StorageProfile {
                id: 1,
                name: "local".to_string(),
                shared: false,
            }],
        }
    }

    /// Look up a node profile by name
    pub fn node(&self, name: &str) -> Option<&NodeProfile> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Names of all nodes
    pub fn node_names(&self) -> Vec<NodeName> {
        self.nodes.iter().map(|n| NodeName::new(&n.name)).collect()
    }

    /// Resolve a numeric storage id
    pub fn storage_name(&self, id: u32) -> Result<&str, ConfigError> {
        self.storages
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.as_str())
            .ok_or(ConfigError::Unknown {
                kind: "storage",
                name: id.to_string(),
            })
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "cluster {} has no nodes",
                self.id
            )));
        }
        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "cluster {} lists node {} twice",
                    self.id, node.name
                )));
            }
            if self.backend == BackendKind::Http && node.api_url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "node {} in cluster {} has no api_url",
                    node.name, self.id
                )));
            }
        }
        Ok(())
    }
}
