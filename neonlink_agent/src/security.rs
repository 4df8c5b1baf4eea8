//! Admission and authorization: origin filter, per-client sliding rate window,
//! command whitelist/blacklist, and the client registry front door.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::proto::CommandRequest;
use crate::registry::{AdmissionError, Connection, ConnectionRegistry, Frame};

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Commands that can change host state. Never accepted unless explicitly enabled.
pub const DANGEROUS_COMMANDS: &[&str] = &[
    "shutdown",
    "restart",
    "reboot",
    "poweroff",
    "halt",
    "hibernate",
    "execute",
    "exec",
    "kill",
    "format",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandValidation {
    pub is_valid: bool,
    pub is_dangerous: bool,
    /// Normalized (trimmed, lower-cased) command name.
    pub command: Option<String>,
    pub error: Option<String>,
    pub warning: Option<String>,
}

impl CommandValidation {
    fn rejected(command: Option<String>, dangerous: bool, error: String) -> Self {
        Self {
            is_valid: false,
            is_dangerous: dangerous,
            command,
            error: Some(error),
            warning: None,
        }
    }
}

/// Request timestamps for one client within the last [`RATE_WINDOW`].
#[derive(Debug, Default)]
struct RateWindow {
    hits: VecDeque<Instant>,
}

impl RateWindow {
    fn trim(&mut self, now: Instant) {
        while let Some(&front) = self.hits.front() {
            if now.saturating_duration_since(front) >= RATE_WINDOW {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub allow_external: bool,
    pub rate_limit_per_minute: usize,
    pub enable_dangerous_commands: bool,
    pub allowed_commands: HashSet<String>,
}

impl From<&ServerConfig> for SecurityPolicy {
    fn from(c: &ServerConfig) -> Self {
        Self {
            allow_external: c.allow_external,
            rate_limit_per_minute: c.rate_limit_per_minute,
            enable_dangerous_commands: c.enable_dangerous_commands,
            allowed_commands: c
                .allowed_commands
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .collect(),
        }
    }
}

pub struct SecurityGate {
    policy: SecurityPolicy,
    windows: Mutex<HashMap<String, RateWindow>>,
    registry: Arc<ConnectionRegistry>,
}

impl SecurityGate {
    pub fn new(policy: SecurityPolicy, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    // ---------- origin ----------

    /// Private-network origins only, unless external origins are enabled.
    /// Accepts a bare IP or an `ip:port` socket address.
    pub fn is_origin_allowed(&self, address: &str) -> bool {
        if self.policy.allow_external {
            return true;
        }
        parse_ip(address).is_some_and(is_private_ip)
    }

    // ---------- rate limiting ----------

    pub fn is_rate_limited(&self, client_id: &str) -> bool {
        self.is_rate_limited_at(client_id, Instant::now())
    }

    /// Trim the window, compare the count before this attempt with the limit,
    /// and record the attempt only when it is admitted.
    pub fn is_rate_limited_at(&self, client_id: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(client_id.to_string()).or_default();
        window.trim(now);
        if window.hits.len() >= self.policy.rate_limit_per_minute {
            return true;
        }
        window.hits.push_back(now);
        false
    }

    fn forget_rate_window(&self, client_id: &str) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client_id);
    }

    // ---------- command validation ----------

    pub fn validate_command(&self, request: &CommandRequest) -> CommandValidation {
        let name = request.command.trim().to_ascii_lowercase();
        if name.is_empty() {
            return CommandValidation::rejected(None, false, "Command is empty".to_string());
        }
        if DANGEROUS_COMMANDS.contains(&name.as_str()) {
            if !self.policy.enable_dangerous_commands {
                return CommandValidation::rejected(
                    Some(name.clone()),
                    true,
                    format!("Command '{name}' is disabled on this server"),
                );
            }
            warn!(command = %name, "dangerous command accepted");
            return CommandValidation {
                is_valid: true,
                is_dangerous: true,
                warning: Some(format!("'{name}' affects the host system")),
                command: Some(name),
                error: None,
            };
        }
        if !self.policy.allowed_commands.contains(&name) {
            return CommandValidation::rejected(
                Some(name.clone()),
                false,
                format!("Command '{name}' not recognized"),
            );
        }
        CommandValidation {
            is_valid: true,
            is_dangerous: false,
            command: Some(name),
            error: None,
            warning: None,
        }
    }

    // ---------- client registry ----------

    pub fn register_client(
        &self,
        id: Option<String>,
        remote_address: &str,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Frame>), AdmissionError> {
        if !self.is_origin_allowed(remote_address) {
            return Err(AdmissionError::OriginRejected(remote_address.to_string()));
        }
        let (conn, rx) = self.registry.register(id, remote_address)?;
        info!(
            conn = %conn.id(),
            addr = %remote_address,
            clients = self.registry.len(),
            "client registered"
        );
        Ok((conn, rx))
    }

    pub fn unregister_client(&self, id: &str) -> bool {
        self.forget_rate_window(id);
        let removed = self.registry.unregister(id);
        if let Some(conn) = &removed {
            info!(
                conn = %id,
                addr = %conn.remote_address(),
                clients = self.registry.len(),
                "client unregistered"
            );
        }
        removed.is_some()
    }

    pub fn update_activity(&self, id: &str) -> bool {
        self.registry.touch(id)
    }

    pub fn connected_count(&self) -> usize {
        self.registry.len()
    }

    pub fn can_accept_connection(&self) -> bool {
        self.registry.can_accept()
    }

    /// Evict idle clients, closing them with an "Idle timeout" reason.
    pub fn cleanup_inactive(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        let evicted = self.registry.evict_idle(timeout);
        for conn in &evicted {
            self.forget_rate_window(conn.id());
            info!(conn = %conn.id(), addr = %conn.remote_address(), "evicting idle client");
            conn.close("Idle timeout");
        }
        evicted
    }
}

fn parse_ip(address: &str) -> Option<IpAddr> {
    let a = address.trim();
    if a.is_empty() {
        return None;
    }
    a.parse::<IpAddr>()
        .ok()
        .or_else(|| a.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_private() || v4.is_loopback(),
            None => v6.is_loopback(),
        },
    }
}
