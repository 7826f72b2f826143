//! vg-orchestrator: Coordination daemon for hypervisor clusters
//!
//! The orchestrator sits between clients and the control APIs of a set of
//! hypervisor nodes. It tracks the asynchronous tasks nodes run, streams
//! template files into node storages and fans them out to the rest of a
//! cluster, issues single-use console credentials and relays the console
//! tunnels they open, and guards guest config writes with a digest.

pub mod api;
pub mod console;
pub mod node;
pub mod state;
pub mod sync;
pub mod task;
pub mod upload;
pub mod vmconfig;

pub use state::OrchestratorState;
