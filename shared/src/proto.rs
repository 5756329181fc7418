//! Wire messages for the DUT remote-execution protocol
//!
//! Hand-derived prost messages; the field tags are the wire contract between
//! `dut-provision` and `dut-server`.

use prost::{Enumeration, Message, Oneof};

/// Kind of message carried by an envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum MessageType {
    MsgUnknown = 0,
    MsgExecRequest = 1,
    MsgExecResponse = 2,
    MsgRestartRequest = 3,
    MsgRestartResponse = 4,
    MsgCacheRequest = 5,
    MsgGetOperation = 6,
    MsgOperationStatus = 7,
    MsgError = 8,
}

#[derive(Clone, PartialEq, Message)]
pub struct Header {
    /// Correlates a response with its request
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "MessageType", tag = "3")]
    pub msg_type: i32,
}

/// Top-level frame payload
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(oneof = "envelope::Payload", tags = "2, 3, 4, 5, 6, 7, 8, 9")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    use super::*;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        ExecRequest(ExecRequest),
        #[prost(message, tag = "3")]
        ExecResponse(ExecResponse),
        #[prost(message, tag = "4")]
        RestartRequest(RestartRequest),
        #[prost(message, tag = "5")]
        RestartResponse(RestartResponse),
        #[prost(message, tag = "6")]
        CacheRequest(CacheRequest),
        #[prost(message, tag = "7")]
        GetOperation(GetOperationRequest),
        #[prost(message, tag = "8")]
        OperationStatus(OperationStatus),
        #[prost(message, tag = "9")]
        Error(ErrorResponse),
    }
}

/// Run `command args...` through the device shell
#[derive(Clone, PartialEq, Message)]
pub struct ExecRequest {
    #[prost(string, tag = "1")]
    pub command: String,
    #[prost(string, repeated, tag = "2")]
    pub args: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExecResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub stdout: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub stderr: Vec<u8>,
    #[prost(int32, tag = "3")]
    pub exit_status: i32,
    /// Set when the command could not be started at all
    #[prost(string, tag = "4")]
    pub error_message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RestartRequest {
    #[prost(string, repeated, tag = "1")]
    pub args: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RestartResponse {}

/// Fetch `source` from the content store onto the device
#[derive(Clone, PartialEq, Message)]
pub struct CacheRequest {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(oneof = "cache_request::Destination", tags = "2, 3")]
    pub destination: Option<cache_request::Destination>,
}

pub mod cache_request {
    use super::*;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Destination {
        /// Store at this path on the device
        #[prost(string, tag = "2")]
        File(String),
        /// Pipe the content into this shell command
        #[prost(string, tag = "3")]
        Pipe(String),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct GetOperationRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// State of a long-running device-side operation
#[derive(Clone, PartialEq, Message)]
pub struct OperationStatus {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub done: bool,
    #[prost(oneof = "operation_status::Outcome", tags = "3, 4")]
    pub outcome: Option<operation_status::Outcome>,
}

pub mod operation_status {
    use super::*;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Outcome {
        #[prost(bytes = "vec", tag = "3")]
        Response(Vec<u8>),
        #[prost(string, tag = "4")]
        Error(String),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ErrorResponse {
    #[prost(string, tag = "1")]
    pub message: String,
}
