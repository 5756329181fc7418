//! Browser bundle install actions

use super::{AshSession, STAGING_DIR};
use crate::adapter::{args, CallContext};
use crate::engine::{Command, StatusCode};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct FetchBundle {
    ctx: CallContext,
    session: Arc<AshSession>,
}

impl FetchBundle {
    pub fn new(ctx: &CallContext, session: &Arc<AshSession>) -> Self {
        Self {
            ctx: *ctx,
            session: Arc::clone(session),
        }
    }
}

#[async_trait]
impl Command for FetchBundle {
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.session
            .adapter()
            .fetch_and_pipe(
                &self.ctx,
                &self.session.request().image_path,
                &format!(
                    "tar --ignore-command-error --overwrite --preserve-permissions --directory={STAGING_DIR} -xf -"
                ),
            )
            .await?;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        self.session
            .adapter()
            .delete_directory(&self.ctx, STAGING_DIR)
            .await?;
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to copy browser bundle"
    }

    fn status(&self) -> StatusCode {
        StatusCode::PreProvisionSetupFailed
    }
}

/// Copy the staged bundle over the installed browser and the test deps
pub struct DeployFiles {
    ctx: CallContext,
    session: Arc<AshSession>,
}

impl DeployFiles {
    pub fn new(ctx: &CallContext, session: &Arc<AshSession>) -> Self {
        Self {
            ctx: *ctx,
            session: Arc::clone(session),
        }
    }
}

#[async_trait]
impl Command for DeployFiles {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let adapter = self.session.adapter();
        for dir in super::install_dirs() {
            adapter
                .run_command(
                    &self.ctx,
                    "cp",
                    &args(&["-a", &format!("{STAGING_DIR}/."), &dir]),
                )
                .await
                .with_context(|| format!("deploy to {dir}"))?;
            info!("deployed browser into {}", dir);
        }
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to deploy browser files"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}
