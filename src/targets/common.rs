//! Commands shared by every provisioning target

use crate::adapter::{args, CallContext, DutAdapter};
use crate::engine::{Command, StatusCode};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Join a content-store directory and a file name with exactly one `/`
pub fn bucket_join(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// `mkdir -p` a set of directories
pub struct CreateDirectories {
    ctx: CallContext,
    adapter: Arc<dyn DutAdapter>,
    dirs: Vec<String>,
    status: StatusCode,
}

impl CreateDirectories {
    pub fn new(
        ctx: &CallContext,
        adapter: &Arc<dyn DutAdapter>,
        dirs: Vec<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            ctx: *ctx,
            adapter: Arc::clone(adapter),
            dirs,
            status,
        }
    }
}

#[async_trait]
impl Command for CreateDirectories {
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.adapter.create_directories(&self.ctx, &self.dirs).await?;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to create directories"
    }

    fn status(&self) -> StatusCode {
        self.status
    }
}

/// Remount the root filesystem read-write
pub struct RemountRootfs {
    ctx: CallContext,
    adapter: Arc<dyn DutAdapter>,
}

impl RemountRootfs {
    pub fn new(ctx: &CallContext, adapter: &Arc<dyn DutAdapter>) -> Self {
        Self {
            ctx: *ctx,
            adapter: Arc::clone(adapter),
        }
    }
}

#[async_trait]
impl Command for RemountRootfs {
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.adapter
            .run_command(&self.ctx, "mount", &args(&["-o", "remount,rw", "/"]))
            .await?;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to mount root file system"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}

/// Reboot the device and wait for it to come back
pub struct RestartDevice {
    ctx: CallContext,
    adapter: Arc<dyn DutAdapter>,
    status: StatusCode,
}

impl RestartDevice {
    pub fn new(ctx: &CallContext, adapter: &Arc<dyn DutAdapter>, status: StatusCode) -> Self {
        Self {
            ctx: *ctx,
            adapter: Arc::clone(adapter),
            status,
        }
    }
}

#[async_trait]
impl Command for RestartDevice {
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.adapter.restart(&self.ctx).await?;
        info!("device is back after restart");
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to restart device"
    }

    fn status(&self) -> StatusCode {
        self.status
    }
}

/// `rm -rf` a set of paths
pub struct DeletePaths {
    ctx: CallContext,
    adapter: Arc<dyn DutAdapter>,
    paths: Vec<String>,
    status: StatusCode,
}

impl DeletePaths {
    pub fn new(
        ctx: &CallContext,
        adapter: &Arc<dyn DutAdapter>,
        paths: Vec<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            ctx: *ctx,
            adapter: Arc::clone(adapter),
            paths,
            status,
        }
    }
}

#[async_trait]
impl Command for DeletePaths {
    async fn execute(&mut self) -> anyhow::Result<()> {
        for path in &self.paths {
            self.adapter
                .delete_directory(&self.ctx, path)
                .await
                .with_context(|| format!("remove {path}"))?;
        }
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to clean up"
    }

    fn status(&self) -> StatusCode {
        self.status
    }
}

/// `start`/`stop` an upstart job; reverting restores the opposite
pub struct ToggleJob {
    ctx: CallContext,
    adapter: Arc<dyn DutAdapter>,
    job: &'static str,
    start: bool,
}

impl ToggleJob {
    pub fn stop(ctx: &CallContext, adapter: &Arc<dyn DutAdapter>, job: &'static str) -> Self {
        Self {
            ctx: *ctx,
            adapter: Arc::clone(adapter),
            job,
            start: false,
        }
    }

    pub fn start(ctx: &CallContext, adapter: &Arc<dyn DutAdapter>, job: &'static str) -> Self {
        Self {
            start: true,
            ..Self::stop(ctx, adapter, job)
        }
    }

    async fn apply(&self, start: bool) -> anyhow::Result<()> {
        let verb = if start { "start" } else { "stop" };
        // Already in the wanted state is not an error
        self.adapter
            .run_command(&self.ctx, verb, &args(&[self.job, "||", "true"]))
            .await
            .with_context(|| format!("{verb} {}", self.job))?;
        Ok(())
    }
}

#[async_trait]
impl Command for ToggleJob {
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.apply(self.start).await
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        self.apply(!self.start).await
    }

    fn error_message(&self) -> &'static str {
        "failed to toggle system job"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}
