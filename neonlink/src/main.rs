//! Entry point for the neonlink viewer. Prints telemetry from an agent and
//! optionally sends it one command.

use anyhow::{Context, Result};
use clap::Parser;
use neonlink::session::{self, WatchOptions, DEFAULT_HEARTBEAT};
use neonlink::ws::{agent_url, connect};
use std::process::{Child, Command};
use std::time::Duration;

const DEMO_PORT: u16 = 3231;

#[derive(Debug, Parser)]
#[command(name = "neonlink", version)]
#[command(about = "Watch a NeonLink agent from the terminal")]
struct Cli {
    /// Agent WebSocket URL
    #[arg(default_value = "ws://127.0.0.1:9876/ws")]
    url: String,

    /// Access token, if the agent requires one
    #[arg(short, long)]
    token: Option<String>,

    /// Send this command after connecting and print the reply
    #[arg(short, long)]
    command: Option<String>,

    /// Command parameter as KEY=VALUE (repeatable)
    #[arg(short = 'P', long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Snapshots to print before exiting (0 = until interrupted)
    #[arg(short = 'n', long, default_value_t = 0)]
    count: usize,

    /// Print raw JSON instead of summaries
    #[arg(long)]
    json: bool,

    /// Start a local mock agent and watch it
    #[arg(long)]
    demo: bool,

    /// Seconds between keep-alive pings (0 = never)
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT.as_secs())]
    heartbeat: u64,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

// Kills the demo agent when the viewer exits.
struct DemoGuard(Child);

impl Drop for DemoGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn find_agent_executable() -> std::path::PathBuf {
    #[cfg(windows)]
    let name = "neonlink_agent.exe";
    #[cfg(not(windows))]
    let name = "neonlink_agent";
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join(name)))
        .filter(|p| p.exists())
        .unwrap_or_else(|| name.into())
}

fn spawn_demo_agent(port: u16) -> Result<DemoGuard> {
    let exe = find_agent_executable();
    let child = Command::new(&exe)
        .args(["--mock", "--bind", "127.0.0.1", "--port"])
        .arg(port.to_string())
        .spawn()
        .with_context(|| format!("starting {}", exe.display()))?;
    // give it a moment to bind
    std::thread::sleep(Duration::from_millis(300));
    Ok(DemoGuard(child))
}

async fn watch(cli: &Cli) -> Result<()> {
    let base = if cli.demo {
        format!("ws://127.0.0.1:{DEMO_PORT}/ws")
    } else {
        cli.url.clone()
    };
    let url = agent_url(&base, cli.token.as_deref())?;
    let mut ws = connect(&url).await?;
    eprintln!("connected to {base}");

    let opts = WatchOptions {
        command: cli.command.clone(),
        params: cli.params.clone(),
        count: cli.count,
        json: cli.json,
        heartbeat: Some(Duration::from_secs(cli.heartbeat)),
    };
    session::watch(&mut ws, &opts, &mut std::io::stdout()).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _demo = if cli.demo {
        Some(spawn_demo_agent(DEMO_PORT)?)
    } else {
        None
    };

    tokio::select! {
        res = watch(&cli) => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}
