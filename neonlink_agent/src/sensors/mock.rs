//! Synthetic sensors for hosts without hardware access (containers, CI,
//! unprivileged runs). Values follow smooth waves so charts look alive, and the
//! snapshot always reports `AdminLevel::Minimal`.

use super::{SensorError, SensorSource};
use crate::config::GamingConfig;
use crate::gaming;
use crate::proto::unix_now;
use crate::types::{
    AdminLevel, CoreLoad, CpuInfo, GpuInfo, GpuVendor, NetworkInfo, RamInfo, SmartData,
    StorageDevice, SystemSnapshot,
};

const CORES: usize = 8;

pub struct MockSensors {
    tick: u64,
    gaming: GamingConfig,
}

impl MockSensors {
    pub fn new(gaming: GamingConfig) -> Self {
        Self {
            tick: 0,
            gaming,
        }
    }
}

fn wave(t: f64, period: f64, lo: f64, hi: f64) -> f64 {
    let mid = (lo + hi) / 2.0;
    let amp = (hi - lo) / 2.0;
    mid + amp * (t * std::f64::consts::TAU / period).sin()
}

impl SensorSource for MockSensors {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn admin_level(&self) -> AdminLevel {
        AdminLevel::Minimal
    }

    fn sample(&mut self) -> Result<SystemSnapshot, SensorError> {
        self.tick = self.tick.wrapping_add(1);
        let t = self.tick as f64;

        let cpu_usage = wave(t, 40.0, 10.0, 70.0) as f32;
        let cores = (0..CORES)
            .map(|i| CoreLoad {
                index: i,
                usage: wave(t + i as f64 * 3.0, 25.0, 5.0, 90.0) as f32,
            })
            .collect();

        let gpu_usage = wave(t, 90.0, 5.0, 99.0) as f32;
        let gpu = GpuInfo {
            name: "NeonLink Virtual GPU".to_string(),
            vendor: GpuVendor::Unknown,
            usage: gpu_usage,
            temperature: 35.0 + gpu_usage * 0.4,
            vram_used: wave(t, 60.0, 1.0, 6.0),
            vram_total: 8.0,
            clock: 1500 + (gpu_usage as u64) * 5,
            memory_clock: Some(7000),
            power: Some(30.0 + gpu_usage * 1.5),
            fan_speed: Some((gpu_usage * 0.8).max(20.0)),
        };
        let gaming = gaming::estimate(&gpu, Some("mock-game".to_string()), &self.gaming);

        Ok(SystemSnapshot {
            timestamp: unix_now(),
            cpu: CpuInfo {
                name: "NeonLink Virtual CPU".to_string(),
                usage: cpu_usage,
                temperature: 40.0 + cpu_usage * 0.3,
                clock: 3200,
                power: None,
                cores,
            },
            gpu,
            ram: RamInfo::new(wave(t, 120.0, 6.0, 10.0), 16.0),
            storage: vec![StorageDevice {
                name: "Virtual NVMe".to_string(),
                temperature: Some(38.0),
                health: Some(98.0),
                smart: Some(SmartData {
                    total_bytes_written: 12_000_000_000_000,
                    power_on_hours: 4_200,
                    reallocated_sectors: 0,
                }),
            }],
            network: Some(NetworkInfo {
                download: wave(t, 30.0, 50_000.0, 2_000_000.0),
                upload: wave(t, 30.0, 10_000.0, 300_000.0),
                ping: 12,
                local_ip: "127.0.0.1".to_string(),
            }),
            gaming,
            admin_level: AdminLevel::Minimal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_values_stay_in_range() {
        let mut m = MockSensors::new(GamingConfig::default());
        for _ in 0..200 {
            let s = m.sample().unwrap();
            assert_eq!(s.admin_level, AdminLevel::Minimal);
            assert!((0.0..=100.0).contains(&s.cpu.usage));
            assert!((0.0..=100.0).contains(&s.gpu.usage));
            assert_eq!(s.cpu.cores.len(), CORES);
            assert!(s.ram.used <= s.ram.total);
            assert!(s.gaming.is_some());
        }
    }
}
