//! Global orchestrator state

use std::sync::Arc;

use vg_core::auth::AuthContext;
use vg_core::config::OrchestratorConfig;
use vg_core::time::Clock;

use crate::console::ConsoleBroker;
use crate::node::NodePool;
use crate::sync::SyncOrchestrator;
use crate::task::TaskRegistry;
use crate::upload::UploadCoordinator;
use crate::vmconfig::VmConfigService;

/// Global state for the orchestrator daemon
pub struct OrchestratorState {
    /// Configuration
    pub config: OrchestratorConfig,
    /// Credentials used towards nodes
    pub auth: Arc<AuthContext>,
    /// Node clients per cluster
    pub nodes: Arc<NodePool>,
    /// Task tracking
    pub tasks: Arc<TaskRegistry>,
    /// In-flight uploads
    pub uploads: Arc<UploadCoordinator>,
    /// Template fan-out
    pub sync: SyncOrchestrator,
    /// Console credentials
    pub consoles: Arc<ConsoleBroker>,
    /// Guest config writes
    pub vm_configs: Arc<VmConfigService>,
    /// Bearer token every API request must present
    pub api_token: String,
}

impl OrchestratorState {
    /// Wire every component over one node pool
    pub fn new(
        config: OrchestratorConfig,
        auth: Arc<AuthContext>,
        nodes: Arc<NodePool>,
        clock: Arc<dyn Clock>,
        api_token: String,
    ) -> Self {
        let tasks = Arc::new(TaskRegistry::new(Arc::clone(&nodes), &config));
        let uploads = Arc::new(UploadCoordinator::new(
            Arc::clone(&nodes),
            config.transfer_timeout,
            Arc::clone(&clock),
        ));
        let sync = SyncOrchestrator::new(
            Arc::clone(&nodes),
            Arc::clone(&tasks),
            Arc::clone(&uploads),
            &config,
            Arc::clone(&clock),
        );
        let consoles = Arc::new(ConsoleBroker::new(Arc::clone(&nodes), &config, clock));
        let vm_configs = Arc::new(VmConfigService::new(
            Arc::clone(&nodes),
            config.control_timeout,
        ));

        Self {
            config,
            auth,
            nodes,
            tasks,
            uploads,
            sync,
            consoles,
            vm_configs,
            api_token,
        }
    }
}
