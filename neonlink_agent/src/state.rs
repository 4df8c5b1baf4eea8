//! Shared agent state handed to every handler and background task.

use std::sync::Arc;
use tokio::sync::watch;

use crate::channel::TelemetryChannel;
use crate::commands::CommandProcessor;
use crate::config::AgentConfig;
use crate::control::SystemControl;
use crate::registry::ConnectionRegistry;
use crate::sampler::PollingControl;
use crate::security::{SecurityGate, SecurityPolicy};
use crate::sensors::SensorHub;

/// Process-wide stop signal. Level-triggered: late waiters return at once.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub channel: Arc<TelemetryChannel>,
    pub gate: Arc<SecurityGate>,
    pub sensors: SensorHub,
    pub polling: Arc<PollingControl>,
    pub processor: Arc<CommandProcessor>,
    pub shutdown: Shutdown,
    pub auth_token: Option<String>,
}

impl AppState {
    /// Wire the shared components from a validated configuration.
    pub fn build(config: AgentConfig, sensors: SensorHub, control: Arc<dyn SystemControl>) -> Self {
        let config = Arc::new(config);
        let server = &config.server;
        let channel = Arc::new(TelemetryChannel::new(server.channel_capacity));
        let registry = Arc::new(ConnectionRegistry::new(
            server.max_connections,
            server.outbound_queue,
        ));
        let gate = Arc::new(SecurityGate::new(
            SecurityPolicy::from(server),
            Arc::clone(&registry),
        ));
        let polling = Arc::new(PollingControl::from_config(&config.polling));
        let processor = Arc::new(CommandProcessor::new(
            Arc::clone(&config),
            Arc::clone(&channel),
            registry,
            sensors.clone(),
            Arc::clone(&polling),
            control,
        ));
        let auth_token = server.auth_token.clone().filter(|t| !t.is_empty());
        Self {
            config,
            channel,
            gate,
            sensors,
            polling,
            processor,
            shutdown: Shutdown::new(),
            auth_token,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: AgentConfig) -> Self {
        use crate::control::OsSystemControl;
        use crate::sensors::MockSensors;
        let sensors = SensorHub::new(
            MockSensors::new(config.gaming.clone()),
            config.hardware.clone(),
        );
        Self::build(config, sensors, Arc::new(OsSystemControl))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.gate.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_is_level_triggered() {
        let s = Shutdown::new();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait().await })
        };
        assert!(!s.is_triggered());
        s.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        // already triggered: returns immediately
        tokio::time::timeout(Duration::from_millis(100), s.wait())
            .await
            .unwrap();
    }
}
