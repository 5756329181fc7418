//! Client sessions for the device agent
//!
//! This module handles:
//! - Framing requests off each client connection
//! - Dispatching every request to the agent concurrently
//! - Writing replies tagged with the originating request id

mod connection;

pub use connection::ClientSession;
