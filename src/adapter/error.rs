//! Errors surfaced by the remote execution adapter

use provision_shared::codec::CodecError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    /// The call deadline elapsed before the device answered
    #[error("timeout reached after {0:?}")]
    Timeout(Duration),

    /// The remote command ran and exited non-zero
    #[error("status:{status} message:{message}")]
    RemoteStatus { status: i32, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    /// A long-running operation finished with a terminal error
    #[error("operation {name} failed: {message}")]
    Operation { name: String, message: String },

    #[error("device unreachable after {attempts} reconnect attempts: {last}")]
    Unreachable { attempts: u32, last: String },

    #[error("connection closed")]
    Closed,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout(_))
    }
}

/// Whether any error in an `anyhow` chain is an adapter timeout
pub fn is_timeout_chain(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<AdapterError>())
        .any(AdapterError::is_timeout)
}
