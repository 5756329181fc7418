//! Request handling for the device agent

use crate::command::{fetch_script, run_exec, OperationManager};
use provision_shared::{envelope::Payload, ErrorResponse, RestartResponse};
use std::sync::Arc;
use tokio::process::Command;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Agent-wide settings
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Command that streams a URL to stdout
    pub fetch_command: String,
    /// Acknowledge restarts without rebooting
    pub no_reboot: bool,
    /// Time between acknowledging a restart and rebooting
    pub reboot_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            fetch_command: "curl -sfL".into(),
            no_reboot: false,
            reboot_delay: Duration::from_secs(1),
        }
    }
}

/// Shared by every connection
pub struct Agent {
    config: AgentConfig,
    operations: Arc<OperationManager>,
}

impl Agent {
    pub fn new(config: AgentConfig, operations: Arc<OperationManager>) -> Self {
        Self { config, operations }
    }

    /// Answer one request payload
    pub async fn handle(&self, payload: Payload) -> Payload {
        match payload {
            Payload::ExecRequest(request) => Payload::ExecResponse(run_exec(&request).await),
            Payload::RestartRequest(_) => {
                self.schedule_reboot();
                Payload::RestartResponse(RestartResponse {})
            }
            Payload::CacheRequest(request) => {
                let script = fetch_script(&self.config.fetch_command, &request);
                Payload::OperationStatus(self.operations.start(script).await)
            }
            Payload::GetOperation(request) => match self.operations.get(&request.name).await {
                Some(status) => Payload::OperationStatus(status),
                None => error_response(format!("unknown operation {}", request.name)),
            },
            other => error_response(format!("unsupported request {:?}", other.msg_type())),
        }
    }

    fn schedule_reboot(&self) {
        if self.config.no_reboot {
            info!("restart acknowledged, reboot skipped (no-reboot)");
            return;
        }
        let delay = self.config.reboot_delay;
        info!("restart acknowledged, rebooting in {:?}", delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match Command::new("reboot").status().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("reboot exited with {}", status),
                Err(e) => error!("failed to run reboot: {}", e),
            }
        });
    }
}

pub fn error_response(message: String) -> Payload {
    Payload::Error(ErrorResponse { message })
}
