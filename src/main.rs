use anyhow::{bail, Result};
use clap::Parser;
use dut_provision::{provision, ProvisionConfig, ProvisionRequest, ProvisionResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Provision software onto a device through its agent
#[derive(Parser, Debug)]
#[command(name = "dut-provision", version)]
struct Args {
    /// Device agent address (overrides the config file)
    #[arg(long)]
    dut: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// TOML provisioning request
    #[arg(long)]
    request: PathBuf,

    /// Deadline for the whole session (overrides the config file)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Never reboot the device
    #[arg(long)]
    no_reboot: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProvisionConfig::load(path)?,
        None => ProvisionConfig::default(),
    };
    if let Some(dut) = args.dut {
        config.connection.address = dut;
    }
    if let Some(secs) = args.timeout_secs {
        config.run.timeout_secs = secs;
    }
    config.adapter.no_reboot |= args.no_reboot;

    let request = ProvisionRequest::load(&args.request)?;
    // Deadline starts before the connection so a slow agent counts against it
    let started = Instant::now();
    let deadline = started + config.run_timeout();

    info!("provisioning {}", config.connection.address);
    let result = match provision::connect(config.connection_config()).await {
        Ok(conn) => {
            provision::provision_over(Arc::new(conn), config.adapter_config(), &request, deadline)
                .await
        }
        Err(failure) => ProvisionResult::Failed(failure),
    };

    match result {
        ProvisionResult::Success { metadata } => {
            info!(
                "provisioning succeeded in {:?}{}",
                started.elapsed(),
                metadata
                    .map(|m| format!(" ({} bytes of metadata)", m.len()))
                    .unwrap_or_default()
            );
            Ok(())
        }
        ProvisionResult::Failed(failure) => {
            error!("provisioning failed: {}", failure);
            bail!("{failure}")
        }
    }
}
