//! Android package provisioning

use crate::adapter::{args, CallContext, DutAdapter};
use crate::engine::{
    execute_commands, Command, CommandList, Failure, ProvisionState, StateOutput, StatusCode,
};
use crate::targets::common::{CreateDirectories, DeletePaths};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const PROVISION_DIR: &str = "/data/local/tmp/provision";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidPackage {
    /// Package name, e.g. `com.google.android.gms`
    pub name: String,
    /// Content-store path of the APK
    pub source: String,
}

impl AndroidPackage {
    fn device_path(&self) -> String {
        format!("{PROVISION_DIR}/{}.apk", self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidRequest {
    pub packages: Vec<AndroidPackage>,
}

pub struct AndroidSession {
    adapter: Arc<dyn DutAdapter>,
    request: AndroidRequest,
}

impl AndroidSession {
    pub fn new(adapter: Arc<dyn DutAdapter>, request: AndroidRequest) -> Arc<Self> {
        Arc::new(Self { adapter, request })
    }
}

struct FetchPackages {
    ctx: CallContext,
    session: Arc<AndroidSession>,
}

#[async_trait]
impl Command for FetchPackages {
    async fn execute(&mut self) -> anyhow::Result<()> {
        for package in &self.session.request.packages {
            self.session
                .adapter
                .fetch_and_store(&self.ctx, &package.source, &package.device_path())
                .await
                .with_context(|| format!("fetch {}", package.name))?;
        }
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        self.session
            .adapter
            .delete_directory(&self.ctx, PROVISION_DIR)
            .await?;
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to fetch packages"
    }

    fn status(&self) -> StatusCode {
        StatusCode::PreProvisionSetupFailed
    }
}

struct InstallPackage {
    ctx: CallContext,
    adapter: Arc<dyn DutAdapter>,
    package: AndroidPackage,
}

#[async_trait]
impl Command for InstallPackage {
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.adapter
            .run_command(
                &self.ctx,
                "pm",
                &args(&["install", "-r", "-d", &self.package.device_path()]),
            )
            .await
            .with_context(|| format!("install {}", self.package.name))?;
        info!("installed {}", self.package.name);
        Ok(())
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn error_message(&self) -> &'static str {
        "failed to install package"
    }

    fn status(&self) -> StatusCode {
        StatusCode::ProvisioningFailed
    }
}

pub enum AndroidState {
    Prepare(Arc<AndroidSession>),
    Install(Arc<AndroidSession>),
    Cleanup(Arc<AndroidSession>),
}

impl AndroidState {
    pub fn entry(session: Arc<AndroidSession>) -> Self {
        AndroidState::Prepare(session)
    }

    fn session(&self) -> &Arc<AndroidSession> {
        match self {
            AndroidState::Prepare(s) | AndroidState::Install(s) | AndroidState::Cleanup(s) => s,
        }
    }
}

#[async_trait]
impl ProvisionState for AndroidState {
    async fn execute(&self, ctx: &CallContext) -> Result<StateOutput, Failure> {
        let s = self.session();
        let commands: CommandList = match self {
            AndroidState::Prepare(_) => vec![
                Box::new(CreateDirectories::new(
                    ctx,
                    &s.adapter,
                    vec![PROVISION_DIR.to_string()],
                    StatusCode::PreProvisionSetupFailed,
                )),
                Box::new(FetchPackages {
                    ctx: *ctx,
                    session: Arc::clone(s),
                }),
            ],
            AndroidState::Install(_) => s
                .request
                .packages
                .iter()
                .map(|package| {
                    Box::new(InstallPackage {
                        ctx: *ctx,
                        adapter: Arc::clone(&s.adapter),
                        package: package.clone(),
                    }) as Box<dyn Command>
                })
                .collect(),
            AndroidState::Cleanup(_) => vec![Box::new(DeletePaths::new(
                ctx,
                &s.adapter,
                vec![PROVISION_DIR.to_string()],
                StatusCode::PostProvisionSetupFailed,
            ))],
        };
        execute_commands(ctx, commands).await?;
        Ok(StateOutput::default())
    }

    fn next(&self) -> Option<Self> {
        let s = Arc::clone(self.session());
        match self {
            AndroidState::Prepare(_) => Some(AndroidState::Install(s)),
            AndroidState::Install(_) => Some(AndroidState::Cleanup(s)),
            AndroidState::Cleanup(_) => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AndroidState::Prepare(_) => "android-prepare",
            AndroidState::Install(_) => "android-install",
            AndroidState::Cleanup(_) => "android-cleanup",
        }
    }
}
