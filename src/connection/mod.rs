//! Connection management for the device agent link
//!
//! This module handles:
//! - A persistent TCP connection to the device-side agent
//! - Correlating responses with requests by request id
//! - Re-establishing the link after a device restart
//! - Closing the link exactly once at the end of a session

mod manager;

pub use manager::{ConnectionConfig, DutConnection};
