//! Drives a state chain to completion under one deadline

use super::state::ProvisionState;
use super::status::{Failure, StatusCode};
use crate::adapter::CallContext;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};

/// Caller-visible outcome of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionResult {
    /// Every state ran; carries the payload of the last state that produced one
    Success { metadata: Option<Bytes> },
    Failed(Failure),
}

impl ProvisionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProvisionResult::Success { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ProvisionResult::Failed(failure) => Some(failure),
            ProvisionResult::Success { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Option<Bytes>, Failure> {
        match self {
            ProvisionResult::Success { metadata } => Ok(metadata),
            ProvisionResult::Failed(failure) => Err(failure),
        }
    }
}

impl From<Failure> for ProvisionResult {
    fn from(failure: Failure) -> Self {
        ProvisionResult::Failed(failure)
    }
}

/// Runs states until `next()` is exhausted or one fails
///
/// The deadline is absolute and covers the whole chain. A failed state has
/// already unwound its own commands; states that completed before it are not
/// reverted.
#[derive(Debug, Clone, Copy)]
pub struct Runner {
    deadline: Instant,
}

impl Runner {
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub async fn run<S: ProvisionState>(&self, entry: S) -> ProvisionResult {
        let ctx = CallContext::with_deadline(self.deadline);
        let mut metadata = None;
        let mut current = Some(entry);

        while let Some(state) = current {
            let name = state.name();
            if ctx.is_expired() {
                error!("deadline passed before state {}", name);
                return Failure::new(
                    StatusCode::ProvisioningTimedOut,
                    format!("provision: timed out before {name}"),
                )
                .into();
            }

            info!("state {} started", name);
            match state.execute(&ctx).instrument(info_span!("state", name)).await {
                Ok(output) => {
                    info!("state {} completed", name);
                    if output.payload.is_some() {
                        metadata = output.payload;
                    }
                }
                Err(failure) => {
                    error!("state {} failed: {}", name, failure);
                    return failure.into();
                }
            }

            current = state.next();
        }

        ProvisionResult::Success { metadata }
    }
}
