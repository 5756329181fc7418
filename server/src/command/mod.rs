//! Request execution on the device
//!
//! This module handles:
//! - Running exec requests through the shell
//! - Starting fetch operations and tracking them by name
//! - Reaping finished operations after a retention period

mod exec;
mod operations;
mod reaper;

pub use exec::{fetch_script, run_exec};
pub use operations::{OperationManager, DEFAULT_RETENTION};
pub use reaper::OperationReaper;
