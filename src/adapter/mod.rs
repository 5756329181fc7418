//! Remote execution adapter
//!
//! This module handles:
//! - The [`DutAdapter`] contract the provisioning engine is written against
//! - Racing remote calls against the caller's deadline
//! - Device restart with bounded reconnect polling
//! - Fetch operations that retry and poll long-running operations to completion

mod context;
mod error;
mod operation;
mod remote;
mod traits;

pub use context::CallContext;
pub use error::{is_timeout_chain, AdapterError};
pub use operation::{Operation, OperationPoller, OperationResult, OperationSource};
pub use remote::{AdapterConfig, RemoteAdapter};
pub use traits::{args, DutAdapter};
