//! Sensor backends. One strategy is chosen at startup; everything else talks
//! to it through [`SensorHub`], which serializes reads (hardware monitoring
//! libraries are generally not reentrant) and keeps them off the async workers.

mod mock;
mod system;

pub use mock::MockSensors;
pub use system::SystemSensors;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{GamingConfig, HardwareConfig};
use crate::types::{AdminLevel, CpuInfo, GpuInfo, RamInfo, SystemSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("sensor lock poisoned")]
    Poisoned,
    #[error("sensor task failed: {0}")]
    Join(String),
    #[error("sensor read timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

pub trait SensorSource: Send {
    fn name(&self) -> &'static str;

    fn admin_level(&self) -> AdminLevel;

    fn sample(&mut self) -> Result<SystemSnapshot, SensorError>;

    /// Hint about the sampling cadence; backends may tune their caches.
    fn set_polling_interval(&mut self, _interval: Duration) {}
}

#[derive(Clone)]
pub struct SensorHub {
    inner: Arc<Mutex<Box<dyn SensorSource>>>,
    name: &'static str,
    admin: Arc<AtomicU8>,
    hardware: Arc<HardwareConfig>,
}

fn level_to_u8(l: AdminLevel) -> u8 {
    match l {
        AdminLevel::Full => 0,
        AdminLevel::Limited => 1,
        AdminLevel::Minimal => 2,
    }
}

fn level_from_u8(v: u8) -> AdminLevel {
    match v {
        0 => AdminLevel::Full,
        1 => AdminLevel::Limited,
        _ => AdminLevel::Minimal,
    }
}

impl SensorHub {
    pub fn new(source: impl SensorSource + 'static, hardware: HardwareConfig) -> Self {
        let name = source.name();
        let admin = Arc::new(AtomicU8::new(level_to_u8(source.admin_level())));
        Self {
            inner: Arc::new(Mutex::new(Box::new(source))),
            name,
            admin,
            hardware: Arc::new(hardware),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn admin_level(&self) -> AdminLevel {
        level_from_u8(self.admin.load(Ordering::Relaxed))
    }

    /// Take one reading. Category flags are applied and percentages clamped
    /// before the snapshot is returned.
    pub async fn sample(&self) -> Result<SystemSnapshot, SensorError> {
        let inner = Arc::clone(&self.inner);
        let mut snap = tokio::task::spawn_blocking(move || {
            let mut src = inner.lock().map_err(|_| SensorError::Poisoned)?;
            match std::panic::catch_unwind(AssertUnwindSafe(|| src.sample())) {
                Ok(r) => r,
                Err(_) => Err(SensorError::Other("sensor backend panicked".into())),
            }
        })
        .await
        .map_err(|e| SensorError::Join(e.to_string()))??;
        apply_category_flags(&mut snap, &self.hardware);
        snap.clamp_percentages();
        self.admin
            .store(level_to_u8(snap.admin_level), Ordering::Relaxed);
        Ok(snap)
    }

    pub async fn set_polling_interval(&self, interval: Duration) {
        let inner = Arc::clone(&self.inner);
        let res = tokio::task::spawn_blocking(move || {
            if let Ok(mut src) = inner.lock() {
                src.set_polling_interval(interval);
            }
        })
        .await;
        if let Err(e) = res {
            warn!("failed to forward polling interval to sensors: {e}");
        }
    }
}

/// Blank out categories disabled in the configuration.
pub fn apply_category_flags(snap: &mut SystemSnapshot, hw: &HardwareConfig) {
    if !hw.cpu {
        snap.cpu = CpuInfo {
            name: "Disabled".to_string(),
            usage: 0.0,
            temperature: 0.0,
            clock: 0,
            power: None,
            cores: Vec::new(),
        };
    }
    if !hw.gpu {
        snap.gpu = GpuInfo::absent();
        snap.gaming = None;
    }
    if !hw.ram {
        snap.ram = RamInfo::new(0.0, 0.0);
    }
    if !hw.storage {
        snap.storage.clear();
    }
    if !hw.network {
        snap.network = None;
    }
}

/// Pick the sensor strategy once, at startup.
pub fn select(hw: &HardwareConfig, gaming: &GamingConfig) -> SensorHub {
    if hw.mock {
        info!("using mock sensors (requested)");
        return SensorHub::new(MockSensors::new(gaming.clone()), hw.clone());
    }
    match SystemSensors::probe(hw.clone(), gaming.clone()) {
        Ok(s) => {
            info!(admin_level = ?s.admin_level(), "using system sensors");
            SensorHub::new(s, hw.clone())
        }
        Err(e) => {
            warn!("system sensors unavailable ({e}); falling back to mock sensors");
            SensorHub::new(MockSensors::new(gaming.clone()), hw.clone())
        }
    }
}

pub(crate) fn bytes_to_gb(b: u64) -> f64 {
    b as f64 / (1024.0 * 1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        calls: u32,
    }

    impl SensorSource for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn admin_level(&self) -> AdminLevel {
            AdminLevel::Limited
        }
        fn sample(&mut self) -> Result<SystemSnapshot, SensorError> {
            self.calls += 1;
            match self.calls {
                1 => {
                    let mut s = SystemSnapshot::degraded(1);
                    s.cpu.usage = 180.0;
                    s.admin_level = AdminLevel::Full;
                    Ok(s)
                }
                2 => Err(SensorError::Unavailable("bus error".into())),
                _ => panic!("driver crashed"),
            }
        }
    }

    #[tokio::test]
    async fn hub_clamps_and_survives_errors_and_panics() {
        let hub = SensorHub::new(Flaky { calls: 0 }, HardwareConfig::default());
        assert_eq!(hub.admin_level(), AdminLevel::Limited);
        let s = hub.sample().await.unwrap();
        assert_eq!(s.cpu.usage, 100.0);
        assert_eq!(hub.admin_level(), AdminLevel::Full);
        assert!(matches!(hub.sample().await, Err(SensorError::Unavailable(_))));
        assert!(matches!(hub.sample().await, Err(SensorError::Other(_))));
    }

    #[tokio::test]
    async fn disabled_categories_are_blanked() {
        let hw = HardwareConfig {
            gpu: false,
            storage: false,
            network: false,
            ..HardwareConfig::default()
        };
        let hub = SensorHub::new(MockSensors::new(GamingConfig::default()), hw);
        let s = hub.sample().await.unwrap();
        assert_eq!(s.gpu, GpuInfo::absent());
        assert!(s.gaming.is_none());
        assert!(s.storage.is_empty());
        assert!(s.network.is_none());
        assert!(s.ram.total > 0.0);
    }

    #[test]
    fn mock_selected_when_requested() {
        let hw = HardwareConfig {
            mock: true,
            ..HardwareConfig::default()
        };
        let hub = select(&hw, &GamingConfig::default());
        assert_eq!(hub.name(), "mock");
        assert_eq!(hub.admin_level(), AdminLevel::Minimal);
    }
}
