//! Startup and orderly shutdown of the whole agent.

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::broadcast::{spawn_broadcaster, spawn_idle_reaper};
use crate::channel::TelemetryChannel;
use crate::config::AgentConfig;
use crate::control::{OsSystemControl, SystemControl};
use crate::discovery::spawn_announcer;
use crate::sampler::spawn_sampler;
use crate::sensors::{self, SensorHub};
use crate::server::{router, SHUTDOWN_REASON};
use crate::state::{AppState, Shutdown};
use crate::tls::ensure_self_signed_cert;

pub struct Agent {
    config: AgentConfig,
    sensors: Option<SensorHub>,
    control: Arc<dyn SystemControl>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            sensors: None,
            control: Arc::new(OsSystemControl),
        }
    }

    /// Use a specific sensor backend instead of probing the host.
    pub fn with_sensors(mut self, sensors: SensorHub) -> Self {
        self.sensors = Some(sensors);
        self
    }

    pub fn with_control(mut self, control: Arc<dyn SystemControl>) -> Self {
        self.control = control;
        self
    }

    /// Bind the listener and start every background task.
    pub async fn start(self) -> anyhow::Result<RunningAgent> {
        self.config.validate()?;
        let sensors = match self.sensors {
            Some(s) => s,
            None => sensors::select(&self.config.hardware, &self.config.gaming),
        };
        let state = AppState::build(self.config, sensors, self.control);
        let cfg = &state.config.server;
        let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

        let (local_addr, server) = if cfg.enable_tls {
            let (cert, key) = ensure_self_signed_cert()?;
            let tls = RustlsConfig::from_pem_file(&cert, &key)
                .await
                .context("loading TLS certificate")?;
            let listener = std::net::TcpListener::bind((cfg.bind.as_str(), cfg.port))
                .with_context(|| format!("binding {}:{}", cfg.bind, cfg.port))?;
            listener.set_nonblocking(true)?;
            let local_addr = listener.local_addr()?;
            let handle = axum_server::Handle::new();
            let stop = state.shutdown.clone();
            let grace = cfg.shutdown_grace();
            let h = handle.clone();
            tokio::spawn(async move {
                stop.wait().await;
                h.graceful_shutdown(Some(grace));
            });
            let server = tokio::spawn(async move {
                if let Err(e) = axum_server::from_tcp_rustls(listener, tls)
                    .handle(handle)
                    .serve(app)
                    .await
                {
                    warn!("tls server error: {e}");
                }
            });
            (local_addr, server)
        } else {
            let listener = tokio::net::TcpListener::bind((cfg.bind.as_str(), cfg.port))
                .await
                .with_context(|| format!("binding {}:{}", cfg.bind, cfg.port))?;
            let local_addr = listener.local_addr()?;
            let stop = state.shutdown.clone();
            let server = tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { stop.wait().await })
                    .await
                {
                    warn!("server error: {e}");
                }
            });
            (local_addr, server)
        };

        let scheme = if cfg.enable_tls { "wss" } else { "ws" };
        info!(
            sensors = state.sensors.name(),
            max_connections = cfg.max_connections,
            "listening on {scheme}://{local_addr}/ws"
        );

        let announcer = state.config.discovery.enabled.then(|| {
            spawn_announcer(
                state.config.discovery.clone(),
                local_addr.port(),
                state.shutdown.clone(),
            )
        });

        Ok(RunningAgent {
            local_addr,
            sampler: spawn_sampler(state.clone()),
            broadcaster: spawn_broadcaster(state.clone()),
            reaper: spawn_idle_reaper(state.clone()),
            announcer,
            server,
            state,
        })
    }
}

pub struct RunningAgent {
    local_addr: SocketAddr,
    state: AppState,
    server: JoinHandle<()>,
    sampler: JoinHandle<()>,
    broadcaster: JoinHandle<()>,
    reaper: JoinHandle<()>,
    announcer: Option<JoinHandle<()>>,
}

async fn join_within(name: &str, limit: Duration, mut task: JoinHandle<()>) {
    if timeout(limit, &mut task).await.is_err() {
        warn!("{name} did not stop in time, aborting");
        task.abort();
    }
}

impl RunningAgent {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn channel(&self) -> Arc<TelemetryChannel> {
        Arc::clone(&self.state.channel)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.state.shutdown.clone()
    }

    /// Stop producing, drain the channel, close every client, stop serving.
    /// Each step is time-bounded.
    pub async fn shutdown(self) {
        info!("shutting down");
        let server_cfg = &self.state.config.server;
        let grace = server_cfg.shutdown_grace();
        let close_timeout = server_cfg.close_timeout();

        self.state.shutdown.trigger();
        join_within("sampler", grace, self.sampler).await;
        self.state.channel.close();
        join_within("broadcaster", grace, self.broadcaster).await;

        let registry = self.state.registry();
        registry.close_all(SHUTDOWN_REASON);
        let deadline = Instant::now() + close_timeout;
        while !registry.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if !registry.is_empty() {
            warn!(remaining = registry.len(), "connections still open after close timeout");
        }

        join_within("idle reaper", grace, self.reaper).await;
        if let Some(a) = self.announcer {
            join_within("announcer", grace, a).await;
        }
        join_within("server", grace, self.server).await;
        info!("shutdown complete");
    }
}
