//! OS image provisioning
//!
//! Installs kernel and root onto the inactive A/B slot, refreshes the stateful
//! partition, reboots into the new slot, then adds DLCs and MiniOS if asked.

mod commands;
mod partitions;

pub use partitions::PartitionInfo;

use crate::adapter::{CallContext, DutAdapter};
use crate::engine::{execute_commands, CommandList, Failure, ProvisionState, StateOutput, StatusCode};
use crate::targets::common::RestartDevice;
use anyhow::anyhow;
use async_trait::async_trait;
use commands::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrosRequest {
    /// Content-store directory holding the build's partition images
    pub image_path: String,
    /// DLC ids to install after the reboot
    pub dlcs: Vec<String>,
    /// Keep the current stateful partition
    pub preserve_stateful: bool,
    pub install_minios: bool,
}

/// Everything one OS image run shares between its states and commands
pub struct CrosSession {
    adapter: Arc<dyn DutAdapter>,
    request: CrosRequest,
    partitions: RwLock<Option<PartitionInfo>>,
}

impl CrosSession {
    pub fn new(adapter: Arc<dyn DutAdapter>, request: CrosRequest) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            request,
            partitions: RwLock::new(None),
        })
    }

    pub fn adapter(&self) -> &Arc<dyn DutAdapter> {
        &self.adapter
    }

    pub fn request(&self) -> &CrosRequest {
        &self.request
    }

    pub async fn set_partitions(&self, info: PartitionInfo) {
        *self.partitions.write().await = Some(info);
    }

    pub async fn partitions(&self) -> anyhow::Result<PartitionInfo> {
        self.partitions
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("root device info has not been read"))
    }
}

pub enum CrosState {
    Init(Arc<CrosSession>),
    Install(Arc<CrosSession>),
    Reboot(Arc<CrosSession>),
    ProvisionDlc(Arc<CrosSession>),
    InstallMiniOs(Arc<CrosSession>),
}

impl CrosState {
    pub fn entry(session: Arc<CrosSession>) -> Self {
        CrosState::Init(session)
    }

    fn session(&self) -> &Arc<CrosSession> {
        match self {
            CrosState::Init(s)
            | CrosState::Install(s)
            | CrosState::Reboot(s)
            | CrosState::ProvisionDlc(s)
            | CrosState::InstallMiniOs(s) => s,
        }
    }

    fn commands(&self, ctx: &CallContext) -> CommandList {
        let s = self.session();
        match self {
            CrosState::Init(_) => vec![
                Box::new(StopSystemDaemons::new(ctx, s)),
                Box::new(ClearDlcArtifacts::new(ctx, s)),
                Box::new(ReadRootInfo::new(ctx, s)),
            ],
            CrosState::Install(_) => {
                let mut list: CommandList = vec![
                    Box::new(InstallPartitions::new(ctx, s)),
                    Box::new(RunPostInstall::new(ctx, s)),
                ];
                if !s.request.preserve_stateful {
                    list.push(Box::new(ProvisionStateful::new(ctx, s)));
                }
                list
            }
            CrosState::Reboot(_) => vec![Box::new(RestartDevice::new(
                ctx,
                s.adapter(),
                StatusCode::ProvisioningFailed,
            ))],
            CrosState::ProvisionDlc(_) => vec![Box::new(InstallDlcs::new(ctx, s))],
            CrosState::InstallMiniOs(_) => vec![Box::new(InstallMiniOs::new(ctx, s))],
        }
    }
}

#[async_trait]
impl ProvisionState for CrosState {
    async fn execute(&self, ctx: &CallContext) -> Result<StateOutput, Failure> {
        execute_commands(ctx, self.commands(ctx)).await?;
        Ok(StateOutput::default())
    }

    fn next(&self) -> Option<Self> {
        let s = Arc::clone(self.session());
        let wants_dlcs = !s.request.dlcs.is_empty();
        let wants_minios = s.request.install_minios;
        match self {
            CrosState::Init(_) => Some(CrosState::Install(s)),
            CrosState::Install(_) => Some(CrosState::Reboot(s)),
            CrosState::Reboot(_) if wants_dlcs => Some(CrosState::ProvisionDlc(s)),
            CrosState::Reboot(_) | CrosState::ProvisionDlc(_) if wants_minios => {
                Some(CrosState::InstallMiniOs(s))
            }
            CrosState::Reboot(_) | CrosState::ProvisionDlc(_) | CrosState::InstallMiniOs(_) => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CrosState::Init(_) => "cros-init",
            CrosState::Install(_) => "cros-install",
            CrosState::Reboot(_) => "cros-reboot",
            CrosState::ProvisionDlc(_) => "cros-provision-dlc",
            CrosState::InstallMiniOs(_) => "cros-install-minios",
        }
    }
}
