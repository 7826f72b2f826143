//! Clients for hypervisor nodes

mod credentials;
mod http;
mod memory;
mod pool;

pub use credentials::run_credential_reloader;
pub use http::HttpNode;
pub use memory::{InMemoryNode, SharedStorage};
pub use pool::NodePool;
pub(crate) use pool::with_deadline;
