//! Shared wire types for DUT provisioning
//!
//! This crate provides the message types and frame codec spoken between the
//! provisioning client and the device-side agent, plus the timing limits both
//! sides agree on.

pub mod codec;
pub mod proto;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing limits for remote execution
pub mod limits {
    /// Command timeout when the caller supplies no deadline
    pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5 * 60;

    /// Upper bound on a whole restart, reconnect included
    pub const RESTART_TIMEOUT_SECS: u64 = 500;

    /// Reconnect attempts after a restart before giving up
    pub const RESTART_RECONNECT_ATTEMPTS: u32 = 50;

    /// Delay between reconnect attempts
    pub const RESTART_RECONNECT_INTERVAL_MS: u64 = 10_000;

    /// Fetch attempts before a cache operation is reported failed
    pub const FETCH_RETRY_TIMES: u32 = 3;

    /// Delay between fetch attempts
    pub const FETCH_RETRY_INTERVAL_MS: u64 = 5_000;

    /// Interval between long-running operation status checks
    pub const OPERATION_POLL_INTERVAL_MS: u64 = 1_000;

    /// Deadline for a whole provisioning session
    pub const PROVISION_TIMEOUT_SECS: u64 = 60 * 60;

    /// TCP connect timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;
}

impl Header {
    /// Create a new header for the given request
    pub fn new(request_id: u64, msg_type: MessageType) -> Self {
        Self {
            request_id,
            timestamp_ms: now_ms(),
            msg_type: msg_type.into(),
        }
    }
}

impl envelope::Payload {
    /// Message type matching this payload
    pub fn msg_type(&self) -> MessageType {
        match self {
            envelope::Payload::ExecRequest(_) => MessageType::MsgExecRequest,
            envelope::Payload::ExecResponse(_) => MessageType::MsgExecResponse,
            envelope::Payload::RestartRequest(_) => MessageType::MsgRestartRequest,
            envelope::Payload::RestartResponse(_) => MessageType::MsgRestartResponse,
            envelope::Payload::CacheRequest(_) => MessageType::MsgCacheRequest,
            envelope::Payload::GetOperation(_) => MessageType::MsgGetOperation,
            envelope::Payload::OperationStatus(_) => MessageType::MsgOperationStatus,
            envelope::Payload::Error(_) => MessageType::MsgError,
        }
    }
}

impl Envelope {
    /// Wrap a payload with a header for `request_id`
    pub fn new(request_id: u64, payload: envelope::Payload) -> Self {
        Self {
            header: Some(Header::new(request_id, payload.msg_type())),
            payload: Some(payload),
        }
    }

    /// Request id from the header, 0 if absent
    pub fn request_id(&self) -> u64 {
        self.header.as_ref().map(|h| h.request_id).unwrap_or_default()
    }
}

impl ExecResponse {
    /// Response for a command that could not be spawned
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: -1,
            error_message: message.into(),
        }
    }
}

impl OperationStatus {
    /// An operation still in flight
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            outcome: None,
        }
    }

    /// A finished operation carrying a response payload
    pub fn succeeded(name: impl Into<String>, response: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            done: true,
            outcome: Some(operation_status::Outcome::Response(response)),
        }
    }

    /// A finished operation carrying a terminal error
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: true,
            outcome: Some(operation_status::Outcome::Error(message.into())),
        }
    }
}
