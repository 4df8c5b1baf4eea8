//! Agent configuration: defaults, optional JSON file, environment overrides.
//! File lives under $XDG_CONFIG_HOME/neonlink/agent.json (fallback: platform config dir).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

pub const DEFAULT_PORT: u16 = 9876;

/// Commands accepted without the dangerous-commands opt-in.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "ping",
    "get_status",
    "get_config",
    "set_polling_interval",
    "get_telemetry",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_connections: usize,
    pub allow_external: bool,
    pub rate_limit_per_minute: usize,
    pub enable_dangerous_commands: bool,
    pub allowed_commands: Vec<String>,
    pub idle_timeout_secs: u64,
    pub close_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub channel_capacity: usize,
    pub outbound_queue: usize,
    pub auth_token: Option<String>,
    pub enable_tls: bool,
    pub dangerous_action_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: 10,
            allow_external: false,
            rate_limit_per_minute: 100,
            enable_dangerous_commands: false,
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            idle_timeout_secs: 120,
            close_timeout_secs: 5,
            shutdown_grace_secs: 3,
            channel_capacity: crate::channel::DEFAULT_CAPACITY,
            outbound_queue: 64,
            auth_token: None,
            enable_tls: false,
            dangerous_action_delay_ms: 2000,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            min_interval_ms: 100,
            max_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HardwareConfig {
    pub cpu: bool,
    pub gpu: bool,
    pub ram: bool,
    pub storage: bool,
    pub network: bool,
    pub mock: bool,
    pub idle_without_clients: bool,
    /// host:port probed with a TCP connect to estimate latency
    pub ping_target: Option<String>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            gpu: true,
            ram: true,
            storage: true,
            network: true,
            mock: false,
            idle_without_clients: true,
            ping_target: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GamingConfig {
    pub enabled: bool,
    pub gpu_load_threshold: f32,
    pub target_fps: f32,
}

impl Default for GamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpu_load_threshold: 80.0,
            target_fps: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub port: u16,
    pub interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9877,
            interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub hardware: HardwareConfig,
    pub gaming: GamingConfig,
    pub discovery: DiscoveryConfig,
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("neonlink")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neonlink")
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("agent.json")
}

impl AgentConfig {
    /// Load from `path` if given (must exist), otherwise from the default
    /// location if present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let p = default_config_path();
                if p.exists() {
                    Self::from_file(&p)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply NEONLINK_AGENT_* overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|k| std::env::var(k).ok());
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        let flag = |k: &str| get(k).map(|v| v != "0" && !v.eq_ignore_ascii_case("false"));
        if let Some(port) = get("NEONLINK_AGENT_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(token) = get("NEONLINK_AGENT_TOKEN").filter(|t| !t.is_empty()) {
            self.server.auth_token = Some(token);
        }
        if let Some(on) = flag("NEONLINK_AGENT_MOCK") {
            self.hardware.mock = on;
        }
        if let Some(on) = flag("NEONLINK_AGENT_ALLOW_EXTERNAL") {
            self.server.allow_external = on;
        }
        if let Some(on) = flag("NEONLINK_AGENT_DANGEROUS") {
            self.server.enable_dangerous_commands = on;
        }
        if let Some(on) = flag("NEONLINK_AGENT_GPU") {
            self.hardware.gpu = on;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.server;
        let p = &self.polling;
        if s.max_connections == 0 {
            return Err(ConfigError::Invalid("server.maxConnections must be > 0".into()));
        }
        if s.channel_capacity == 0 {
            return Err(ConfigError::Invalid("server.channelCapacity must be > 0".into()));
        }
        if s.rate_limit_per_minute == 0 {
            return Err(ConfigError::Invalid("server.rateLimitPerMinute must be > 0".into()));
        }
        if s.outbound_queue == 0 {
            return Err(ConfigError::Invalid("server.outboundQueue must be > 0".into()));
        }
        if p.min_interval_ms == 0 {
            return Err(ConfigError::Invalid("polling.minIntervalMs must be > 0".into()));
        }
        if p.min_interval_ms > p.max_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "polling.minIntervalMs ({}) exceeds polling.maxIntervalMs ({})",
                p.min_interval_ms, p.max_interval_ms
            )));
        }
        Ok(())
    }

    /// Config as reported to clients: secrets removed.
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        if c.server.auth_token.is_some() {
            c.server.auth_token = Some("***".to_string());
        }
        c
    }
}
