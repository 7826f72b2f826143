//! vmgate: Command-line client for the vmgate orchestrator
//!
//! Talks to the daemon's HTTP API with the bearer token it writes on
//! start-up: task status and log tailing, template sync listing and retry,
//! uploads, and console credentials.

pub mod client;
pub mod commands;
pub mod output;
