//! OS image install actions

use super::partitions::{PartitionInfo, MINIOS_PARTITIONS};
use super::CrosSession;
use crate::adapter::{args, CallContext};
use crate::engine::{Command, StatusCode};
use crate::targets::common::bucket_join;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const STATEFUL_PATH: &str = "/mnt/stateful_partition";
pub const UPDATE_STATEFUL_FILE: &str = "/mnt/stateful_partition/.update_available";
pub const DLC_CACHE_DIR: &str = "/var/cache/dlc-images";
const POSTINSTALL_MOUNT: &str = "/tmp/provision-postinst";

/// Stream a gzip'd partition image straight onto a block device
fn dd_pipe(device: &str) -> String {
    format!("gzip -d | dd of={device} obs=2M")
}

macro_rules! session_command {
    ($name:ident) => {
        pub struct $name {
            ctx: CallContext,
            session: Arc<CrosSession>,
        }

        impl $name {
            pub fn new(ctx: &CallContext, session: &Arc<CrosSession>) -> Self {
                Self {
                    ctx: *ctx,
                    session: Arc::clone(session),
                }
            }
        }
    };
}

session_command!(StopSystemDaemons);
session_command!(ClearDlcArtifacts);
session_command!(ReadRootInfo);
session_command!(InstallPartitions);
session_command!(RunPostInstall);
session_command!(ProvisionStateful);
session_command!(InstallDlcs);
session_command!(InstallMiniOs);

#[async_trait]
impl Command for StopSystemDaemons {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let adapter = self.session.adapter();
        for job in ["ui", "update-engine"] {
            adapter
                .run_command(&self.ctx, "stop", &args(&[job, "||", "true"]))
                .await
                .with_context(|| format!("stop {job}"))?;
        }
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        let adapter = self.session.adapter();
        for job in ["update-engine", "ui"] {
            adapter
                .run_command(&self.ctx, "start", &args(&[job, "||", "true"]))
                .await
                .with_context(|| format!("start {job}"))?;
        }
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to stop system daemons"
    }

    fn status(&self) -> StatusCode {
        StatusCode::PreProvisionSetupFailed
    }
}

#[async_trait]
impl Command for ClearDlcArtifacts {
    async fn execute(&mut self) -> anyhow::Result<()> {
        // Verified DLC images from the old build must not survive into the new one
        self.session
            .adapter()
            .run_command(
                &self.ctx,
                "rm",
                &args(&["-rf", &format!("{DLC_CACHE_DIR}/*/package/verified")]),
            )
            .await?;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to clear DLC artifacts"
    }

    fn status(&self) -> StatusCode {
        StatusCode::PreProvisionSetupFailed
    }
}

#[async_trait]
impl Command for ReadRootInfo {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let out = self
            .session
            .adapter()
            .run_command(&self.ctx, "rootdev", &args(&["-s"]))
            .await?;
        let info = PartitionInfo::from_root_device(&out)?;
        info!(
            "active root {} on {}, installing to {}",
            info.active_root,
            info.disk,
            info.inactive_root_device()
        );
        self.session.set_partitions(info).await;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to get root device info"
    }

    fn status(&self) -> StatusCode {
        StatusCode::PreProvisionSetupFailed
    }
}

#[async_trait]
impl Command for InstallPartitions {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let info = self.session.partitions().await?;
        let image = &self.session.request().image_path;
        let adapter = self.session.adapter();

        adapter
            .fetch_and_pipe(
                &self.ctx,
                &bucket_join(image, "full_dev_part_KERN.bin.gz"),
                &dd_pipe(&info.inactive_kernel_device()),
            )
            .await
            .context("install kernel")?;
        adapter
            .fetch_and_pipe(
                &self.ctx,
                &bucket_join(image, "full_dev_part_ROOT.bin.gz"),
                &dd_pipe(&info.inactive_root_device()),
            )
            .await
            .context("install root")?;
        Ok(())
    }

    // The running system is untouched; a half-written inactive slot is never booted
    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to install partitions"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}

#[async_trait]
impl Command for RunPostInstall {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let info = self.session.partitions().await?;
        let root = info.inactive_root_device();
        let adapter = self.session.adapter();

        adapter
            .create_directories(&self.ctx, &[POSTINSTALL_MOUNT.to_string()])
            .await?;
        adapter
            .run_command(&self.ctx, "mount", &args(&["-o", "ro", &root, POSTINSTALL_MOUNT]))
            .await
            .context("mount new root")?;
        adapter
            .run_command(
                &self.ctx,
                &format!("{POSTINSTALL_MOUNT}/postinst"),
                &args(&[&root]),
            )
            .await
            .context("postinst")?;
        adapter
            .run_command(&self.ctx, "umount", &args(&[POSTINSTALL_MOUNT]))
            .await
            .context("unmount new root")?;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        self.session
            .adapter()
            .run_command(
                &self.ctx,
                "umount",
                &args(&["-l", POSTINSTALL_MOUNT, "||", "true"]),
            )
            .await?;
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to run postinstall"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}

impl ProvisionStateful {
    fn staged_paths() -> Vec<String> {
        vec![
            format!("{STATEFUL_PATH}/var_new"),
            format!("{STATEFUL_PATH}/dev_image_new"),
            UPDATE_STATEFUL_FILE.to_string(),
        ]
    }
}

#[async_trait]
impl Command for ProvisionStateful {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let adapter = self.session.adapter();
        let image = &self.session.request().image_path;

        let mut rm = args(&["-rf"]);
        rm.extend(Self::staged_paths());
        adapter.run_command(&self.ctx, "rm", &rm).await?;

        adapter
            .fetch_and_pipe(
                &self.ctx,
                &bucket_join(image, "stateful.tgz"),
                &format!(
                    "tar --ignore-command-error --overwrite --directory={STATEFUL_PATH} --selinux -xzf -"
                ),
            )
            .await
            .context("unpack stateful")?;

        // Picked up by the stateful update on next boot
        adapter
            .run_command(
                &self.ctx,
                "echo",
                &args(&["-n", "clobber", ">", UPDATE_STATEFUL_FILE]),
            )
            .await
            .context("write update marker")?;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        let mut rm = args(&["-rf"]);
        rm.extend(Self::staged_paths());
        self.session.adapter().run_command(&self.ctx, "rm", &rm).await?;
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to provision stateful"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}

#[async_trait]
impl Command for InstallDlcs {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let adapter = self.session.adapter();
        let request = self.session.request();

        for dlc in &request.dlcs {
            let dir = format!("{DLC_CACHE_DIR}/{dlc}/package");
            adapter
                .create_directories(&self.ctx, &[dir.clone()])
                .await?;
            adapter
                .fetch_and_store(
                    &self.ctx,
                    &bucket_join(&request.image_path, &format!("dlc/{dlc}/package/dlc.img")),
                    &format!("{dir}/dlc.img"),
                )
                .await
                .with_context(|| format!("install DLC {dlc}"))?;
            info!("installed DLC {}", dlc);
        }
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        let adapter = self.session.adapter();
        for dlc in &self.session.request().dlcs {
            if let Err(e) = adapter
                .delete_directory(&self.ctx, &format!("{DLC_CACHE_DIR}/{dlc}"))
                .await
            {
                warn!("failed to remove DLC {}: {}", dlc, e);
            }
        }
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to provision DLCs"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}

#[async_trait]
impl Command for InstallMiniOs {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let info = self.session.partitions().await?;
        let source = bucket_join(&self.session.request().image_path, "full_dev_part_MINIOS.bin.gz");

        for number in MINIOS_PARTITIONS {
            self.session
                .adapter()
                .fetch_and_pipe(&self.ctx, &source, &dd_pipe(&info.partition(number)))
                .await
                .with_context(|| format!("install MiniOS partition {number}"))?;
        }
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to install MiniOS"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}
