//! Firmware provisioning
//!
//! Every requested image is downloaded and unpacked first. RO updates flash
//! with write protection off (and also flash RW when one was given); RW-only
//! requests take the autoupdate path. The device is rebooted at the end.

mod commands;

use crate::adapter::{CallContext, DutAdapter};
use crate::engine::{execute_commands, CommandList, Failure, ProvisionState, StateOutput, StatusCode};
use crate::targets::common::{CreateDirectories, RestartDevice};
use async_trait::async_trait;
use commands::{DownloadArchive, FlashFirmware};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

const WORK_DIR: &str = "/tmp/fw-provision";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareRequest {
    pub main_rw_path: Option<String>,
    pub main_ro_path: Option<String>,
    pub ec_ro_path: Option<String>,
    pub pd_ro_path: Option<String>,
}

impl FirmwareRequest {
    /// Requested images in download order
    pub fn images(&self) -> Vec<(ImageKind, &str)> {
        [
            (ImageKind::MainRw, &self.main_rw_path),
            (ImageKind::MainRo, &self.main_ro_path),
            (ImageKind::EcRo, &self.ec_ro_path),
            (ImageKind::PdRo, &self.pd_ro_path),
        ]
        .into_iter()
        .filter_map(|(kind, path)| {
            path.as_deref()
                .filter(|p| !p.is_empty())
                .map(|p| (kind, p))
        })
        .collect()
    }

    pub fn updates_ro(&self) -> bool {
        self.images().iter().any(|(kind, _)| kind.is_read_only())
    }

    pub fn updates_rw(&self) -> bool {
        self.images().iter().any(|(kind, _)| *kind == ImageKind::MainRw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    MainRw,
    MainRo,
    EcRo,
    PdRo,
}

impl ImageKind {
    fn dir_name(self) -> &'static str {
        match self {
            ImageKind::MainRw => "main_rw",
            ImageKind::MainRo => "main_ro",
            ImageKind::EcRo => "ec_ro",
            ImageKind::PdRo => "pd_ro",
        }
    }

    fn is_read_only(self) -> bool {
        self != ImageKind::MainRw
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Default)]
struct Prepared {
    by_source: HashMap<String, String>,
    by_kind: HashMap<ImageKind, String>,
}

pub struct FirmwareSession {
    adapter: Arc<dyn DutAdapter>,
    request: FirmwareRequest,
    prepared: RwLock<Prepared>,
}

impl FirmwareSession {
    pub fn new(adapter: Arc<dyn DutAdapter>, request: FirmwareRequest) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            request,
            prepared: RwLock::new(Prepared::default()),
        })
    }

    pub fn adapter(&self) -> &Arc<dyn DutAdapter> {
        &self.adapter
    }

    pub fn request(&self) -> &FirmwareRequest {
        &self.request
    }

    fn archive_dir(&self, kind: ImageKind) -> String {
        format!("{WORK_DIR}/{}", kind.dir_name())
    }

    async fn extracted_dir(&self, source: &str) -> Option<String> {
        self.prepared.read().await.by_source.get(source).cloned()
    }

    async fn record(&self, kind: ImageKind, source: &str, dir: String) {
        let mut prepared = self.prepared.write().await;
        prepared.by_source.insert(source.to_string(), dir.clone());
        prepared.by_kind.insert(kind, dir);
    }

    async fn dir_for(&self, kind: ImageKind) -> Option<String> {
        self.prepared.read().await.by_kind.get(&kind).cloned()
    }
}

pub enum FirmwareState {
    Prepare(Arc<FirmwareSession>),
    UpdateRo(Arc<FirmwareSession>),
    UpdateRw(Arc<FirmwareSession>),
    Reboot(Arc<FirmwareSession>),
}

impl FirmwareState {
    pub fn entry(session: Arc<FirmwareSession>) -> Self {
        FirmwareState::Prepare(session)
    }

    fn session(&self) -> &Arc<FirmwareSession> {
        match self {
            FirmwareState::Prepare(s)
            | FirmwareState::UpdateRo(s)
            | FirmwareState::UpdateRw(s)
            | FirmwareState::Reboot(s) => s,
        }
    }
}

#[async_trait]
impl ProvisionState for FirmwareState {
    async fn execute(&self, ctx: &CallContext) -> Result<StateOutput, Failure> {
        let s = self.session();
        let commands: CommandList = match self {
            FirmwareState::Prepare(_) => {
                let mut list: CommandList = vec![Box::new(CreateDirectories::new(
                    ctx,
                    s.adapter(),
                    vec![WORK_DIR.to_string()],
                    StatusCode::UpdateFirmwareFailed,
                ))];
                for (kind, source) in s.request.images() {
                    list.push(Box::new(DownloadArchive::new(ctx, s, kind, source.to_string())));
                }
                list
            }
            FirmwareState::UpdateRo(_) => {
                let mut list: CommandList = vec![Box::new(FlashFirmware::read_only(ctx, s))];
                if s.request.updates_rw() {
                    list.push(Box::new(FlashFirmware::read_write(ctx, s)));
                }
                list
            }
            FirmwareState::UpdateRw(_) => vec![Box::new(FlashFirmware::read_write(ctx, s))],
            FirmwareState::Reboot(_) => vec![Box::new(RestartDevice::new(
                ctx,
                s.adapter(),
                StatusCode::UpdateFirmwareFailed,
            ))],
        };
        execute_commands(ctx, commands).await?;
        Ok(StateOutput::default())
    }

    fn next(&self) -> Option<Self> {
        let s = Arc::clone(self.session());
        match self {
            FirmwareState::Prepare(_) if s.request.updates_ro() => Some(FirmwareState::UpdateRo(s)),
            FirmwareState::Prepare(_) => Some(FirmwareState::UpdateRw(s)),
            FirmwareState::UpdateRo(_) | FirmwareState::UpdateRw(_) => {
                Some(FirmwareState::Reboot(s))
            }
            FirmwareState::Reboot(_) => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FirmwareState::Prepare(_) => "firmware-prepare",
            FirmwareState::UpdateRo(_) => "firmware-update-ro",
            FirmwareState::UpdateRw(_) => "firmware-update-rw",
            FirmwareState::Reboot(_) => "firmware-reboot",
        }
    }
}
