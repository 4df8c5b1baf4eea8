//! Command handling for validated requests. Every outcome, including handler
//! panics, becomes a `CommandResponse`; nothing escapes to the socket loop.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::channel::TelemetryChannel;
use crate::config::AgentConfig;
use crate::control::{ControlError, SystemControl};
use crate::proto::{unix_now, CommandRequest, CommandResponse};
use crate::registry::ConnectionRegistry;
use crate::sampler::{read_timeout, PollingControl};
use crate::security::CommandValidation;
use crate::sensors::{SensorError, SensorHub};
use crate::types::{AdminLevel, SystemSnapshot};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const INTERVAL_KEYS: &[&str] = &["intervalMs", "interval_ms", "interval"];

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Missing parameter '{0}'")]
    MissingParam(&'static str),
    #[error("Invalid value for '{name}': {value}")]
    InvalidParam { name: &'static str, value: String },
    #[error("{0}")]
    Unsupported(String),
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("system control error: {0}")]
    Control(#[from] ControlError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerAction {
    Shutdown,
    Restart,
}

impl PowerAction {
    fn from_command(name: &str) -> Option<Self> {
        match name {
            "shutdown" | "poweroff" | "halt" => Some(Self::Shutdown),
            "restart" | "reboot" => Some(Self::Restart),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Restart => "restart",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub remote_address: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub snapshot: SystemSnapshot,
    pub uptime_secs: u64,
    pub connected_clients: usize,
    pub clients: Vec<ClientInfo>,
    pub admin_level: AdminLevel,
    pub version: &'static str,
    pub hostname: String,
    pub polling_interval_ms: u64,
}

pub struct CommandProcessor {
    config: Arc<AgentConfig>,
    channel: Arc<TelemetryChannel>,
    registry: Arc<ConnectionRegistry>,
    sensors: SensorHub,
    polling: Arc<PollingControl>,
    control: Arc<dyn SystemControl>,
    started: Instant,
    hostname: String,
}

impl CommandProcessor {
    pub fn new(
        config: Arc<AgentConfig>,
        channel: Arc<TelemetryChannel>,
        registry: Arc<ConnectionRegistry>,
        sensors: SensorHub,
        polling: Arc<PollingControl>,
        control: Arc<dyn SystemControl>,
    ) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            config,
            channel,
            registry,
            sensors,
            polling,
            control,
            started: Instant::now(),
            hostname,
        }
    }

    /// Run a request that already went through the security gate.
    pub async fn execute(
        &self,
        validation: &CommandValidation,
        request: &CommandRequest,
    ) -> CommandResponse {
        let name = validation
            .command
            .clone()
            .unwrap_or_else(|| request.command.trim().to_ascii_lowercase());
        if !validation.is_valid {
            let msg = validation
                .error
                .clone()
                .unwrap_or_else(|| "Invalid command".to_string());
            return CommandResponse::fail(name, msg);
        }
        guarded(&name, self.dispatch(&name, request)).await
    }

    async fn dispatch(&self, name: &str, request: &CommandRequest) -> Result<Value, CommandError> {
        match name {
            "ping" => Ok(json!({ "pong": true, "timestamp": unix_now() })),
            "get_status" => to_value(&self.status().await),
            "get_config" => to_value(&self.config.redacted()),
            "set_polling_interval" => self.set_polling_interval(request).await,
            "get_telemetry" => Ok(self.telemetry_info()),
            other => match PowerAction::from_command(other) {
                Some(action) => Ok(self.schedule(action)),
                None => Err(CommandError::Unsupported(format!(
                    "Command '{other}' is not supported"
                ))),
            },
        }
    }

    /// Current telemetry plus server facts. A sensor read that fails or
    /// outlives the read timeout is answered with a degraded snapshot.
    pub async fn status(&self) -> StatusReport {
        let limit = read_timeout(self.polling.interval());
        let read = tokio::time::timeout(limit, self.sensors.sample())
            .await
            .unwrap_or(Err(SensorError::Timeout));
        let snapshot = match read {
            Ok(s) => s,
            Err(e) => {
                warn!("status sample failed: {e}");
                let mut s = SystemSnapshot::degraded(unix_now());
                s.admin_level = self.sensors.admin_level();
                s
            }
        };
        let clients: Vec<ClientInfo> = self
            .registry
            .connections()
            .iter()
            .map(|c| ClientInfo {
                id: c.id().to_string(),
                remote_address: c.remote_address().to_string(),
                connected_at: c.connected_at(),
                last_activity_at: c.last_activity_at(),
            })
            .collect();
        StatusReport {
            admin_level: snapshot.admin_level,
            snapshot,
            uptime_secs: self.started.elapsed().as_secs(),
            connected_clients: clients.len(),
            clients,
            version: VERSION,
            hostname: self.hostname.clone(),
            polling_interval_ms: self.polling.interval_ms(),
        }
    }

    pub async fn status_payload(&self) -> Value {
        serde_json::to_value(self.status().await).unwrap_or(Value::Null)
    }

    async fn set_polling_interval(&self, request: &CommandRequest) -> Result<Value, CommandError> {
        let raw = request
            .param(INTERVAL_KEYS)
            .ok_or(CommandError::MissingParam("intervalMs"))?;
        let requested = parse_millis(raw).ok_or_else(|| CommandError::InvalidParam {
            name: "intervalMs",
            value: raw.to_string(),
        })?;
        let applied = self.polling.set_ms(requested);
        let hint = self
            .sensors
            .set_polling_interval(Duration::from_millis(applied));
        if tokio::time::timeout(read_timeout(self.polling.interval()), hint)
            .await
            .is_err()
        {
            warn!("sensors busy, polling hint not delivered");
        }
        info!(requested, applied, "polling interval changed");
        Ok(json!({ "intervalMs": applied, "requestedMs": requested }))
    }

    fn telemetry_info(&self) -> Value {
        let (min_ms, max_ms) = self.polling.bounds();
        json!({
            "message": "Telemetry is streamed on this connection at the polling interval",
            "buffered": self.channel.len(),
            "capacity": self.channel.capacity(),
            "dropped": self.channel.dropped(),
            "pollingIntervalMs": self.polling.interval_ms(),
            "minIntervalMs": min_ms,
            "maxIntervalMs": max_ms,
        })
    }

    /// Delay so the acknowledgement reaches the client before the host goes down.
    fn schedule(&self, action: PowerAction) -> Value {
        let delay_ms = self.config.server.dangerous_action_delay_ms;
        let control = Arc::clone(&self.control);
        warn!(action = action.as_str(), delay_ms, "host power action scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let res = tokio::task::spawn_blocking(move || match action {
                PowerAction::Shutdown => control.shutdown(),
                PowerAction::Restart => control.restart(),
            })
            .await;
            match res {
                Ok(Ok(())) => info!(action = action.as_str(), "host power action issued"),
                Ok(Err(e)) => error!(action = action.as_str(), "host power action failed: {e}"),
                Err(e) => error!(action = action.as_str(), "host power task failed: {e}"),
            }
        });
        json!({ "scheduled": true, "action": action.as_str(), "delayMs": delay_ms })
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, CommandError> {
    serde_json::to_value(v).map_err(|e| CommandError::Internal(e.to_string()))
}

/// Integer milliseconds; whole-valued floats such as "500.0" are accepted.
fn parse_millis(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Turn a handler outcome, including a panic, into a response.
pub async fn guarded<F>(name: &str, fut: F) -> CommandResponse
where
    F: Future<Output = Result<Value, CommandError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => CommandResponse::ok(name, value),
        Ok(Err(e)) => {
            debug!(command = name, "command failed: {e}");
            CommandResponse::fail(name, e.to_string())
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(command = name, "command handler panicked: {msg}");
            CommandResponse::fail(name, format!("Internal error: {msg}"))
        }
    }
}
