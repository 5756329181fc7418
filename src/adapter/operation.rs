//! Long-running operation handles and the poller that waits on them

use super::error::AdapterError;
use async_trait::async_trait;
use bytes::Bytes;
use provision_shared::{operation_status::Outcome, OperationStatus};
use std::time::Duration;
use tracing::debug;

/// Terminal result of a remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Response(Bytes),
    Error(String),
}

/// Handle for an asynchronous task running on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    pub result: Option<OperationResult>,
}

impl From<OperationStatus> for Operation {
    fn from(status: OperationStatus) -> Self {
        let result = status.outcome.map(|outcome| match outcome {
            Outcome::Response(bytes) => OperationResult::Response(Bytes::from(bytes)),
            Outcome::Error(message) => OperationResult::Error(message),
        });
        Self {
            name: status.name,
            done: status.done,
            result,
        }
    }
}

/// Anything that can report the current status of an operation
#[async_trait]
pub trait OperationSource: Send + Sync {
    async fn get_operation(&self, name: &str) -> Result<Operation, AdapterError>;
}

/// Waits for operations to finish by checking them at a fixed interval
///
/// The poller has no upper bound of its own; callers wrap `wait` in their
/// own deadline.
#[derive(Debug, Clone, Copy)]
pub struct OperationPoller {
    interval: Duration,
}

impl OperationPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Block until `op` is done and return its response payload
    pub async fn wait<S>(&self, source: &S, mut op: Operation) -> Result<Bytes, AdapterError>
    where
        S: OperationSource + ?Sized,
    {
        while !op.done {
            tokio::time::sleep(self.interval).await;
            op = source.get_operation(&op.name).await?;
            debug!("operation {} done={}", op.name, op.done);
        }

        match op.result {
            Some(OperationResult::Error(message)) => Err(AdapterError::Operation {
                name: op.name,
                message,
            }),
            Some(OperationResult::Response(payload)) => Ok(payload),
            None => Ok(Bytes::new()),
        }
    }
}
