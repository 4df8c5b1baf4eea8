//! Background sampler: reads sensors at the polling cadence and feeds the
//! telemetry channel, so the broadcaster never waits on hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::proto::unix_now;
use crate::sensors::{SensorError, SensorHub};
use crate::state::AppState;
use crate::types::SystemSnapshot;

/// Current sampling cadence, adjustable at runtime within fixed bounds.
pub struct PollingControl {
    interval_ms: AtomicU64,
    min_ms: u64,
    max_ms: u64,
    changed: Notify,
}

impl PollingControl {
    pub fn new(initial_ms: u64, min_ms: u64, max_ms: u64) -> Self {
        let (min_ms, max_ms) = (min_ms.min(max_ms), max_ms.max(min_ms));
        Self {
            interval_ms: AtomicU64::new(initial_ms.clamp(min_ms, max_ms)),
            min_ms,
            max_ms,
            changed: Notify::new(),
        }
    }

    pub fn from_config(cfg: &PollingConfig) -> Self {
        Self::new(cfg.interval_ms, cfg.min_interval_ms, cfg.max_interval_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms())
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    pub fn bounds(&self) -> (u64, u64) {
        (self.min_ms, self.max_ms)
    }

    pub fn clamp(&self, requested_ms: i64) -> u64 {
        (requested_ms.max(0) as u64).clamp(self.min_ms, self.max_ms)
    }

    /// Store the clamped value, wake the sampler, and return what was applied.
    pub fn set_ms(&self, requested_ms: i64) -> u64 {
        let applied = self.clamp(requested_ms);
        self.interval_ms.store(applied, Ordering::Relaxed);
        self.changed.notify_waiters();
        applied
    }

    async fn changed(&self) {
        self.changed.notified().await
    }
}

/// Sensor reads with fallbacks: on failure the last good snapshot (re-stamped)
/// or a degraded one is used so the broadcast cadence never stalls.
pub struct SnapshotSource {
    hub: SensorHub,
    last_good: Option<SystemSnapshot>,
    last_ts: i64,
}

impl SnapshotSource {
    pub fn new(hub: SensorHub) -> Self {
        Self {
            hub,
            last_good: None,
            last_ts: i64::MIN,
        }
    }

    pub async fn next(&mut self, timeout: Duration) -> SystemSnapshot {
        let read = match tokio::time::timeout(timeout, self.hub.sample()).await {
            Ok(r) => r,
            Err(_) => Err(SensorError::Timeout),
        };
        let mut snap = match read {
            Ok(s) => {
                self.last_good = Some(s.clone());
                s
            }
            Err(e) => {
                warn!("sensor read failed, reusing last snapshot: {e}");
                match &self.last_good {
                    Some(s) => {
                        let mut s = s.clone();
                        s.timestamp = unix_now();
                        s
                    }
                    None => SystemSnapshot::degraded(unix_now()),
                }
            }
        };
        // never let a snapshot go back in time
        snap.timestamp = snap.timestamp.max(self.last_ts);
        self.last_ts = snap.timestamp;
        snap
    }
}

/// Longest a single sensor read may take before a fallback is used.
pub(crate) fn read_timeout(interval: Duration) -> Duration {
    (interval * 3).max(Duration::from_secs(2))
}

pub fn spawn_sampler(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut source = SnapshotSource::new(state.sensors.clone());
        let idle_without_clients = state.config.hardware.idle_without_clients;
        info!(
            sensors = state.sensors.name(),
            interval_ms = state.polling.interval_ms(),
            "sampler started"
        );
        loop {
            if state.shutdown.is_triggered() {
                break;
            }
            if idle_without_clients && state.registry().is_empty() {
                debug!("no clients, sampler idle");
                tokio::select! {
                    _ = state.registry().wait_for_clients() => {}
                    _ = state.shutdown.wait() => break,
                }
            }

            let period = state.polling.interval();
            let snap = source.next(read_timeout(period)).await;
            if !state.channel.write(snap) {
                debug!("telemetry channel closed, sampler exiting");
                break;
            }

            tokio::select! {
                _ = sleep(period) => {}
                _ = state.polling.changed() => {}
                _ = state.shutdown.wait() => break,
            }
        }
        info!("sampler stopped");
    })
}
