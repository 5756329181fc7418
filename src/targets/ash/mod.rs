//! Browser provisioning

mod commands;

use crate::adapter::{CallContext, DutAdapter};
use crate::engine::{execute_commands, CommandList, Failure, ProvisionState, StateOutput, StatusCode};
use crate::targets::common::{CreateDirectories, DeletePaths, RemountRootfs, ToggleJob};
use async_trait::async_trait;
use commands::{DeployFiles, FetchBundle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub(crate) const STAGING_DIR: &str = "/tmp/ash-provision";
const TARGET_DIR: &str = "/opt/google/chrome";
const AUTOTEST_DIR: &str = "/usr/local/autotest/deps/chrome_test/test_src/out/Release";
const TAST_DIR: &str = "/usr/local/libexec/chrome-binary-tests";

fn install_dirs() -> Vec<String> {
    [TARGET_DIR, AUTOTEST_DIR, TAST_DIR]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AshRequest {
    /// Content-store path of the browser tarball
    pub image_path: String,
}

pub struct AshSession {
    adapter: Arc<dyn DutAdapter>,
    request: AshRequest,
}

impl AshSession {
    pub fn new(adapter: Arc<dyn DutAdapter>, request: AshRequest) -> Arc<Self> {
        Arc::new(Self { adapter, request })
    }

    pub fn adapter(&self) -> &Arc<dyn DutAdapter> {
        &self.adapter
    }

    pub fn request(&self) -> &AshRequest {
        &self.request
    }
}

pub enum AshState {
    Prepare(Arc<AshSession>),
    Install(Arc<AshSession>),
    Cleanup(Arc<AshSession>),
}

impl AshState {
    pub fn entry(session: Arc<AshSession>) -> Self {
        AshState::Prepare(session)
    }

    fn session(&self) -> &Arc<AshSession> {
        match self {
            AshState::Prepare(s) | AshState::Install(s) | AshState::Cleanup(s) => s,
        }
    }
}

#[async_trait]
impl ProvisionState for AshState {
    async fn execute(&self, ctx: &CallContext) -> Result<StateOutput, Failure> {
        let s = self.session();
        let adapter = s.adapter();
        let commands: CommandList = match self {
            AshState::Prepare(_) => {
                let mut dirs = vec![STAGING_DIR.to_string()];
                dirs.extend(install_dirs());
                vec![
                    Box::new(CreateDirectories::new(
                        ctx,
                        adapter,
                        dirs,
                        StatusCode::PreProvisionSetupFailed,
                    )),
                    Box::new(FetchBundle::new(ctx, s)),
                ]
            }
            AshState::Install(_) => vec![
                Box::new(RemountRootfs::new(ctx, adapter)),
                Box::new(ToggleJob::stop(ctx, adapter, "ui")),
                Box::new(DeployFiles::new(ctx, s)),
            ],
            AshState::Cleanup(_) => vec![
                Box::new(DeletePaths::new(
                    ctx,
                    adapter,
                    vec![STAGING_DIR.to_string()],
                    StatusCode::PostProvisionSetupFailed,
                )),
                Box::new(ToggleJob::start(ctx, adapter, "ui")),
            ],
        };
        execute_commands(ctx, commands).await?;
        Ok(StateOutput::default())
    }

    fn next(&self) -> Option<Self> {
        let s = Arc::clone(self.session());
        match self {
            AshState::Prepare(_) => Some(AshState::Install(s)),
            AshState::Install(_) => Some(AshState::Cleanup(s)),
            AshState::Cleanup(_) => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AshState::Prepare(_) => "ash-prepare",
            AshState::Install(_) => "ash-install",
            AshState::Cleanup(_) => "ash-cleanup",
        }
    }
}
