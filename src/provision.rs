//! Top-level provisioning entry points

use crate::adapter::{AdapterConfig, DutAdapter, RemoteAdapter};
use crate::connection::{ConnectionConfig, DutConnection};
use crate::engine::{Failure, ProvisionResult, Runner, StatusCode};
use crate::targets::{
    AndroidRequest, AndroidSession, AndroidState, AshRequest, AshSession, AshState, CrosRequest,
    CrosSession, CrosState, FirmwareRequest, FirmwareSession, FirmwareState,
};
use crate::transport::DutTransport;
use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// What to install on the device
///
/// Targets run in field order, each as its own state chain under the one
/// session deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionRequest {
    pub os_image: Option<CrosRequest>,
    pub browser: Option<AshRequest>,
    pub android: Option<AndroidRequest>,
    pub firmware: Option<FirmwareRequest>,
    /// Never reboot the device, even where a target would
    pub prevent_reboot: bool,
}

impl ProvisionRequest {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid provision request")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }

    /// Reject requests no state chain could act on
    pub fn validate(&self) -> Result<(), Failure> {
        let invalid = |msg: &str| Err(Failure::new(StatusCode::InvalidRequest, msg));

        if self.os_image.is_none()
            && self.browser.is_none()
            && self.android.is_none()
            && self.firmware.is_none()
        {
            return invalid("no provisioning target requested");
        }
        if let Some(os) = &self.os_image {
            if os.image_path.is_empty() {
                return invalid("os_image: image_path is required");
            }
            if os.dlcs.iter().any(|d| d.is_empty() || d.contains('/')) {
                return invalid("os_image: invalid DLC id");
            }
        }
        if let Some(browser) = &self.browser {
            if browser.image_path.is_empty() {
                return invalid("browser: image_path is required");
            }
        }
        if let Some(android) = &self.android {
            if android.packages.is_empty() {
                return invalid("android: no package requested");
            }
            if android
                .packages
                .iter()
                .any(|p| p.name.is_empty() || p.source.is_empty())
            {
                return invalid("android: every package needs a name and a source");
            }
        }
        if let Some(firmware) = &self.firmware {
            if firmware.images().is_empty() {
                return invalid("firmware: no image requested");
            }
        }
        Ok(())
    }
}

/// Run every requested target against `adapter`
///
/// The first failing target ends the run; targets that already finished are
/// left installed.
pub async fn provision(
    adapter: Arc<dyn DutAdapter>,
    request: &ProvisionRequest,
    deadline: Instant,
) -> ProvisionResult {
    match run_targets(adapter, request, Runner::new(deadline)).await {
        Ok(metadata) => ProvisionResult::Success { metadata },
        Err(failure) => ProvisionResult::Failed(failure),
    }
}

async fn run_targets(
    adapter: Arc<dyn DutAdapter>,
    request: &ProvisionRequest,
    runner: Runner,
) -> Result<Option<Bytes>, Failure> {
    request.validate()?;
    let mut metadata = None;

    if let Some(os) = &request.os_image {
        info!("provisioning OS image {}", os.image_path);
        let session = CrosSession::new(Arc::clone(&adapter), os.clone());
        metadata = runner.run(CrosState::entry(session)).await.into_result()?.or(metadata);
    }
    if let Some(browser) = &request.browser {
        info!("provisioning browser {}", browser.image_path);
        let session = AshSession::new(Arc::clone(&adapter), browser.clone());
        metadata = runner.run(AshState::entry(session)).await.into_result()?.or(metadata);
    }
    if let Some(android) = &request.android {
        info!("provisioning {} android package(s)", android.packages.len());
        let session = AndroidSession::new(Arc::clone(&adapter), android.clone());
        metadata = runner.run(AndroidState::entry(session)).await.into_result()?.or(metadata);
    }
    if let Some(firmware) = &request.firmware {
        info!("provisioning {} firmware image(s)", firmware.images().len());
        let session = FirmwareSession::new(Arc::clone(&adapter), firmware.clone());
        metadata = runner.run(FirmwareState::entry(session)).await.into_result()?.or(metadata);
    }

    Ok(metadata)
}

/// Open the device connection, mapping failure to `DutUnreachable`
pub async fn connect(config: ConnectionConfig) -> Result<DutConnection, Failure> {
    let address = config.address.clone();
    DutConnection::connect(config).await.map_err(|e| {
        warn!("cannot reach device agent at {}: {}", address, e);
        Failure::new(
            StatusCode::DutUnreachable,
            format!("connect to {address}: {e}"),
        )
    })
}

/// Provision over an open transport, then close it
///
/// The transport is closed exactly once, whatever the outcome.
pub async fn provision_over<T: DutTransport>(
    transport: Arc<T>,
    mut config: AdapterConfig,
    request: &ProvisionRequest,
    deadline: Instant,
) -> ProvisionResult {
    config.no_reboot |= request.prevent_reboot;
    let adapter: Arc<dyn DutAdapter> = Arc::new(RemoteAdapter::new(Arc::clone(&transport), config));

    let result = provision(adapter, request, deadline).await;
    transport.close().await;
    result
}
