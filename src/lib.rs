//! DUT provisioning engine
//!
//! Drives a device through ordered, reversible install states over a
//! remote-execution connection to an on-device agent.

pub mod adapter;
pub mod config;
pub mod connection;
pub mod engine;
pub mod provision;
pub mod targets;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::ProvisionConfig;
pub use engine::{Failure, ProvisionResult, Runner, StatusCode};
pub use provision::{provision, provision_over, ProvisionRequest};
