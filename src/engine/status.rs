//! Caller-facing status codes and the failure record

use std::fmt;
use thiserror::Error;

/// Closed set of failure classifications reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    ProvisioningFailed,
    ProvisioningTimedOut,
    UpdateFirmwareFailed,
    PreProvisionSetupFailed,
    PostProvisionSetupFailed,
    InvalidRequest,
    DutUnreachable,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::ProvisioningFailed => "PROVISIONING_FAILED",
            StatusCode::ProvisioningTimedOut => "PROVISIONING_TIMEDOUT",
            StatusCode::UpdateFirmwareFailed => "UPDATE_FIRMWARE_FAILED",
            StatusCode::PreProvisionSetupFailed => "PRE_PROVISION_SETUP_FAILED",
            StatusCode::PostProvisionSetupFailed => "POST_PROVISION_SETUP_FAILED",
            StatusCode::InvalidRequest => "INVALID_REQUEST",
            StatusCode::DutUnreachable => "DUT_UNREACHABLE",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single (status, reason) pair recorded for a failed run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status}: {message}")]
pub struct Failure {
    pub status: StatusCode,
    pub message: String,
}

impl Failure {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}
