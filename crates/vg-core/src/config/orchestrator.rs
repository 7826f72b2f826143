//! Orchestrator configuration

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use super::ClusterProfile;
use crate::error::ConfigError;
use crate::types::ClusterId;

/// Configuration for the orchestrator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Address the HTTP API binds to
    pub http_bind: String,

    /// Address the console tunnel listener binds to
    pub tunnel_bind: String,

    /// Tunnel address handed to clients (defaults to `tunnel_bind`)
    pub tunnel_advertise: Option<String>,

    /// Deadline for ordinary control calls to a node
    #[serde(with = "duration_secs")]
    pub control_timeout: Duration,

    /// Deadline for uploads and node-to-node copies
    #[serde(with = "duration_secs")]
    pub transfer_timeout: Duration,

    /// Deadline for backup imports (restore plus wait)
    #[serde(with = "duration_secs")]
    pub import_timeout: Duration,

    /// Lifetime of a console token
    #[serde(with = "duration_secs")]
    pub console_token_ttl: Duration,

    /// How long consumed/expired console records stay rejectable with a precise reason
    #[serde(with = "duration_secs")]
    pub console_retention: Duration,

    /// How often the console sweeper runs
    #[serde(with = "duration_secs")]
    pub console_sweep_interval: Duration,

    /// Interval between task status polls when waiting on a UPID
    #[serde(with = "duration_millis")]
    pub task_poll_interval: Duration,

    /// Backoff for transient node errors while waiting on a UPID
    pub backoff: BackoffConfig,

    /// Maximum sync copies running at once (unbounded when absent)
    pub max_parallel_syncs: Option<usize>,

    /// File the API bearer token is written to
    pub token_path: PathBuf,

    /// File holding node API credentials
    pub credentials_path: PathBuf,

    /// Known clusters
    pub clusters: Vec<ClusterProfile>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            http_bind: "127.0.0.1:8750".to_string(),
            tunnel_bind: "127.0.0.1:8751".to_string(),
            tunnel_advertise: None,
            control_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(300),
            import_timeout: Duration::from_secs(300),
            console_token_ttl: Duration::from_secs(120),
            console_retention: Duration::from_secs(600),
            console_sweep_interval: Duration::from_secs(15),
            task_poll_interval: Duration::from_millis(2000),
            backoff: BackoffConfig::default(),
            max_parallel_syncs: Some(4),
            token_path: config_dir.join("api_token"),
            credentials_path: config_dir.join("credentials.json"),
            clusters: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Address clients should dial for console tunnels
    pub fn tunnel_address(&self) -> &str {
        self.tunnel_advertise.as_deref().unwrap_or(&self.tunnel_bind)
    }

    /// Look up a cluster profile
    pub fn cluster(&self, id: ClusterId) -> Option<&ClusterProfile> {
        self.clusters.iter().find(|c| c.id == id)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_timeout.is_zero() || self.transfer_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.transfer_timeout < self.control_timeout {
            return Err(ConfigError::Invalid(
                "transfer_timeout must not be shorter than control_timeout".into(),
            ));
        }
        if self.console_token_ttl.is_zero() {
            return Err(ConfigError::Invalid("console_token_ttl must be non-zero".into()));
        }
        if self.max_parallel_syncs == Some(0) {
            return Err(ConfigError::Invalid("max_parallel_syncs must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if !seen.insert(cluster.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate cluster id {}",
                    cluster.id
                )));
            }
            cluster.validate()?;
        }
        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(15),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based), jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max.as_secs_f64());
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_deadline_longer_than_control() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.transfer_timeout, config.control_timeout * 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_console_ttl_default_is_two_minutes() {
        assert_eq!(
            OrchestratorConfig::default().console_token_ttl,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_clusters() {
        let mut config = OrchestratorConfig::default();
        config.clusters.push(ClusterProfile::in_memory(1, "a", &["n1"]));
        config.clusters.push(ClusterProfile::in_memory(1, "b", &["n2"]));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_tunnel_address_fallback() {
        let mut config = OrchestratorConfig::default();
        assert_eq!(config.tunnel_address(), "127.0.0.1:8751");
        config.tunnel_advertise = Some("console.example.net:443".into());
        assert_eq!(config.tunnel_address(), "console.example.net:443");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = BackoffConfig::default();
        for _ in 0..50 {
            let d = backoff.delay(1);
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1250));
        }
    }
}
