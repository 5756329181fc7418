//! Provisioning states and in-state command unwinding

use super::command::Command;
use super::status::{Failure, StatusCode};
use crate::adapter::{is_timeout_chain, CallContext};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, warn};

/// Commands a state runs, in declared order
pub type CommandList = Vec<Box<dyn Command>>;

/// Side-channel output of a successful state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateOutput {
    pub payload: Option<Bytes>,
}

/// One step of a provisioning workflow
///
/// Each provisioning domain implements this on a closed enum of its states,
/// so every transition is visible in one `match`.
#[async_trait]
pub trait ProvisionState: Sized + Send + Sync {
    /// Run this state's commands
    async fn execute(&self, ctx: &CallContext) -> Result<StateOutput, Failure>;

    /// The following state, or `None` when the workflow is complete
    ///
    /// Depends only on what the session has recorded, never on execution order.
    fn next(&self) -> Option<Self>;

    /// Stable identifier for logs and failure messages
    fn name(&self) -> &'static str;
}

/// Execute `commands` in order; on the first failure unwind what ran
///
/// When command `k` fails, commands `k, k-1, ..., 0` are reverted in that order
/// (the failing command first, since it may have partially applied) and
/// commands after `k` never run. Only this state's commands are unwound;
/// earlier states are left as they are.
pub async fn execute_commands(
    ctx: &CallContext,
    mut commands: CommandList,
) -> Result<(), Failure> {
    for index in 0..commands.len() {
        let err = match commands[index].execute().await {
            Ok(()) => continue,
            Err(err) => err,
        };

        let (status, mut message) = {
            let failed = &commands[index];
            error!("{} failed: {:#}", failed.name(), err);
            let status = if is_timeout_chain(&err) || ctx.is_expired() {
                StatusCode::ProvisioningTimedOut
            } else {
                failed.status()
            };
            (status, format!("{}: {:#}", failed.error_message(), err))
        };

        for command in commands[..=index].iter_mut().rev() {
            match command.revert().await {
                Ok(()) => info!("reverted {}", command.name()),
                Err(revert_err) => {
                    warn!("revert {} failed: {:#}", command.name(), revert_err);
                    message.push_str(&format!(
                        "; revert {} failed: {:#}",
                        command.name(),
                        revert_err
                    ));
                }
            }
        }

        return Err(Failure::new(status, message));
    }
    Ok(())
}
