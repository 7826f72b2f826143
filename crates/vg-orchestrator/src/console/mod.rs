//! Console session brokering and tunnel proxying

mod broker;
mod cleanup;
mod tunnel;

pub use broker::{ConsoleBroker, ConsoleGrant, ConsoleRequest, ConsoleSession, SweepStats, TokenState};
pub use cleanup::run_console_sweeper;
pub use tunnel::TunnelServer;
