//! Firmware download and flash actions

use super::{FirmwareSession, ImageKind};
use crate::adapter::{args, CallContext};
use crate::engine::{Command, StatusCode};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Download one archive and unpack it into its own directory
///
/// An archive that an earlier image already fetched is reused.
pub struct DownloadArchive {
    ctx: CallContext,
    session: Arc<FirmwareSession>,
    kind: ImageKind,
    source: String,
    created: Option<String>,
}

impl DownloadArchive {
    pub fn new(
        ctx: &CallContext,
        session: &Arc<FirmwareSession>,
        kind: ImageKind,
        source: String,
    ) -> Self {
        Self {
            ctx: *ctx,
            session: Arc::clone(session),
            kind,
            source,
            created: None,
        }
    }
}

#[async_trait]
impl Command for DownloadArchive {
    async fn execute(&mut self) -> anyhow::Result<()> {
        if let Some(dir) = self.session.extracted_dir(&self.source).await {
            info!("{} reuses {} already unpacked in {}", self.kind, self.source, dir);
            self.session.record(self.kind, &self.source, dir).await;
            return Ok(());
        }

        let dir = self.session.archive_dir(self.kind);
        let adapter = self.session.adapter();
        adapter.create_directories(&self.ctx, &[dir.clone()]).await?;
        self.created = Some(dir.clone());

        adapter
            .fetch_and_pipe(&self.ctx, &self.source, &format!("tar -xjf - -C {dir}"))
            .await
            .with_context(|| format!("download {} image", self.kind))?;
        self.session.record(self.kind, &self.source, dir).await;
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        if let Some(dir) = self.created.take() {
            self.session.adapter().delete_directory(&self.ctx, &dir).await?;
        }
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to download firmware image"
    }

    fn status(&self) -> StatusCode {
        StatusCode::UpdateFirmwareFailed
    }
}

/// Flash with `futility`, write-protect off for RO, on for RW
pub struct FlashFirmware {
    ctx: CallContext,
    session: Arc<FirmwareSession>,
    read_only: bool,
}

impl FlashFirmware {
    pub fn read_only(ctx: &CallContext, session: &Arc<FirmwareSession>) -> Self {
        Self {
            ctx: *ctx,
            session: Arc::clone(session),
            read_only: true,
        }
    }

    pub fn read_write(ctx: &CallContext, session: &Arc<FirmwareSession>) -> Self {
        Self {
            read_only: false,
            ..Self::read_only(ctx, session)
        }
    }

    async fn futility_args(&self) -> anyhow::Result<Vec<String>> {
        let mut argv = args(&["update", "--mode=recovery"]);
        if self.read_only {
            if let Some(dir) = self.session.dir_for(ImageKind::MainRo).await {
                argv.extend(args(&["-i", &format!("{dir}/image.bin")]));
            }
            if let Some(dir) = self.session.dir_for(ImageKind::EcRo).await {
                argv.extend(args(&["--ec_image", &format!("{dir}/ec.bin")]));
            }
            if let Some(dir) = self.session.dir_for(ImageKind::PdRo).await {
                argv.extend(args(&["--pd_image", &format!("{dir}/pd.bin")]));
            }
            argv.push("--wp=0".into());
        } else {
            let dir = self
                .session
                .dir_for(ImageKind::MainRw)
                .await
                .ok_or_else(|| anyhow!("no RW image was prepared"))?;
            argv[1] = "--mode=autoupdate".into();
            argv.extend(args(&["-i", &format!("{dir}/image.bin"), "--wp=1"]));
        }
        argv.push("--force".into());
        Ok(argv)
    }
}

#[async_trait]
impl Command for FlashFirmware {
    async fn execute(&mut self) -> anyhow::Result<()> {
        let argv = self.futility_args().await?;
        self.session
            .adapter()
            .run_command(&self.ctx, "futility", &argv)
            .await?;
        Ok(())
    }

    // The old firmware is gone once futility starts writing
    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        if self.read_only {
            "failed to update RO firmware"
        } else {
            "failed to update RW firmware"
        }
    }

    fn status(&self) -> StatusCode {
        StatusCode::UpdateFirmwareFailed
    }
}
