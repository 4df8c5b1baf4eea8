//! neonlink_agent: hardware telemetry server for NeonLink viewers.

use anyhow::{Context, Result};
use clap::Parser;
use neonlink_agent::{Agent, AgentConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "neonlink_agent", version)]
#[command(about = "Streams hardware telemetry to NeonLink viewers over WebSocket")]
struct Cli {
    /// Listen port (overrides config and NEONLINK_AGENT_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Config file (JSON). Defaults to $XDG_CONFIG_HOME/neonlink/agent.json
    #[arg(long)]
    config: Option<PathBuf>,

    /// Synthetic sensor data instead of real hardware
    #[arg(long)]
    mock: bool,

    /// Serve wss:// with a self-signed certificate
    #[arg(long = "enableSSL")]
    enable_ssl: bool,

    /// Accept clients from outside private/loopback ranges
    #[arg(long)]
    allow_external: bool,

    /// Announce the agent on the LAN via UDP broadcast
    #[arg(long)]
    discovery: bool,

    #[arg(long)]
    max_connections: Option<usize>,
}

impl Cli {
    fn apply(&self, cfg: &mut AgentConfig) {
        if let Some(p) = self.port {
            cfg.server.port = p;
        }
        if let Some(b) = &self.bind {
            cfg.server.bind = b.clone();
        }
        if let Some(m) = self.max_connections {
            cfg.server.max_connections = m;
        }
        cfg.hardware.mock |= self.mock;
        cfg.server.enable_tls |= self.enable_ssl;
        cfg.server.allow_external |= self.allow_external;
        cfg.discovery.enabled |= self.discovery;
    }
}

async fn shutdown_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config.apply_env();
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let running = Agent::new(config).start().await?;
    info!(addr = %running.local_addr(), "neonlink_agent running");

    shutdown_requested().await;
    running.shutdown().await;
    Ok(())
}
