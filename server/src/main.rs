mod agent;
mod command;
mod session;

use agent::{Agent, AgentConfig};
use clap::Parser;
use command::{OperationManager, OperationReaper, DEFAULT_RETENTION};
use session::ClientSession;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Device-side agent answering provisioning requests
#[derive(Parser, Debug)]
#[command(name = "dut-server", version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:7700")]
    listen: String,

    /// Acknowledge restart requests without rebooting
    #[arg(long)]
    no_reboot: bool,

    /// Command that streams a URL to stdout
    #[arg(long, default_value = "curl -sfL")]
    fetch_command: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let operations = Arc::new(OperationManager::new(DEFAULT_RETENTION));
    let reaper = OperationReaper::new(Arc::clone(&operations));
    tokio::spawn(async move { reaper.run().await });

    let agent = Arc::new(Agent::new(
        AgentConfig {
            fetch_command: args.fetch_command,
            no_reboot: args.no_reboot,
            ..Default::default()
        },
        operations,
    ));

    let listener = TcpListener::bind(&args.listen).await?;
    info!("dut-server listening on {}", args.listen);

    loop {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        tokio::spawn(ClientSession::new(stream, addr).serve(Arc::clone(&agent)));
    }
}
