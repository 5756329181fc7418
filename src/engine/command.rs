//! The unit of provisioning work

use super::status::StatusCode;
use async_trait::async_trait;

/// One atomic, independently reversible install action
///
/// Commands are built fresh for each state execution and are never reused.
/// Progress is logged through the `tracing` span the runner opens for the
/// owning state.
#[async_trait]
pub trait Command: Send {
    /// Perform the action
    async fn execute(&mut self) -> anyhow::Result<()>;

    /// Best-effort undo of `execute`
    ///
    /// Must be safe after a partial `execute` or none at all. Errors are only
    /// logged and appended to the failure message, never the primary failure.
    async fn revert(&mut self) -> anyhow::Result<()>;

    /// What this command is responsible for, used to explain a failure
    fn error_message(&self) -> &'static str;

    /// Status reported when this command fails
    fn status(&self) -> StatusCode;

    fn name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}
