//! Provisioning orchestration engine
//!
//! This module handles:
//! - The [`Command`] contract for reversible install actions
//! - [`ProvisionState`] chains and in-state revert unwinding
//! - The [`Runner`] that applies one deadline to a whole chain
//! - Status codes and the single failure record of a run

mod command;
mod runner;
mod state;
mod status;

pub use command::Command;
pub use runner::{ProvisionResult, Runner};
pub use state::{execute_commands, CommandList, ProvisionState, StateOutput};
pub use status::{Failure, StatusCode};
