//! Transport abstraction underneath the remote execution adapter

use crate::adapter::{AdapterError, Operation, OperationSource};
use async_trait::async_trait;
use provision_shared::{CacheRequest, ExecRequest, ExecResponse};

/// Raw request/response access to a device-side agent
///
/// Implementations do not apply deadlines or retries; the adapter does.
#[async_trait]
pub trait DutTransport: OperationSource + Send + Sync + 'static {
    /// Execute a command and wait for its response
    async fn exec(&self, request: ExecRequest) -> Result<ExecResponse, AdapterError>;

    /// Ask the device to reboot
    async fn reboot(&self) -> Result<(), AdapterError>;

    /// Drop the current link and establish a new one
    async fn reconnect(&self) -> Result<(), AdapterError>;

    /// Start a fetch operation on the device
    async fn cache(&self, request: CacheRequest) -> Result<Operation, AdapterError>;

    /// Close the link for good
    async fn close(&self);

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
