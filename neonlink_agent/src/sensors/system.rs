//! Real sensors via sysinfo (cpu/mem/disks/net/temps) and gfxinfo (gpu).

use std::collections::HashSet;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use sysinfo::{
    Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind,
    ProcessesToUpdate, RefreshKind, System,
};
use tracing::{debug, warn};

use super::{bytes_to_gb, SensorError, SensorSource};
use crate::config::{GamingConfig, HardwareConfig};
use crate::discovery::local_ip;
use crate::gaming;
use crate::gpu::probe_gpu;
use crate::proto::unix_now;
use crate::types::{
    AdminLevel, CoreLoad, CpuInfo, GpuInfo, NetworkInfo, RamInfo, StorageDevice, SystemSnapshot,
    PING_UNKNOWN,
};

// Don't rescan slow sources every tick
const LOCAL_IP_TTL: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_millis(800);

pub struct SystemSensors {
    hw: HardwareConfig,
    gaming: GamingConfig,
    sys: System,
    components: Components,
    disks: Disks,
    networks: Networks,
    last_net: Instant,
    // First probe records presence; later samples skip a missing GPU.
    gpu_present: Option<bool>,
    local_ip: Option<(Instant, String)>,
    admin: AdminLevel,
}

fn label_matches(label: &str, keys: &[&str]) -> bool {
    let l = label.to_ascii_lowercase();
    keys.iter().any(|k| l.contains(k))
}

fn hottest(components: &Components, keys: &[&str]) -> Option<f32> {
    components
        .iter()
        .filter(|c| label_matches(c.label(), keys))
        .filter_map(|c| c.temperature())
        .filter(|t| t.is_finite())
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}

const CPU_LABELS: &[&str] = &["cpu", "package", "tctl", "tdie", "coretemp", "k10temp"];
const GPU_LABELS: &[&str] = &["gpu", "amdgpu", "nouveau", "edge", "junction"];
const DISK_LABELS: &[&str] = &["nvme", "drive", "ssd", "disk"];

impl SystemSensors {
    /// Open sysinfo handles and decide how much of the sensor surface is
    /// reachable. Fails when not even CPU data can be read.
    pub fn probe(hw: HardwareConfig, gaming: GamingConfig) -> Result<Self, SensorError> {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut sys = System::new_with_specifics(refresh_kind);
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        if sys.cpus().is_empty() || sys.total_memory() == 0 {
            return Err(SensorError::Unavailable("no cpu/memory information".into()));
        }

        let components = Components::new_with_refreshed_list();
        let has_temps = components
            .iter()
            .any(|c| c.temperature().is_some_and(|t| t.is_finite() && t > 0.0));

        let mut me = Self {
            hw,
            gaming,
            sys,
            components,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            last_net: Instant::now(),
            gpu_present: None,
            local_ip: None,
            admin: AdminLevel::Limited,
        };
        let has_gpu = me.read_gpu().is_some();
        me.admin = if has_temps && has_gpu {
            AdminLevel::Full
        } else {
            AdminLevel::Limited
        };
        Ok(me)
    }

    fn read_gpu(&mut self) -> Option<GpuInfo> {
        if !self.hw.gpu || self.gpu_present == Some(false) {
            return None;
        }
        match probe_gpu() {
            Ok(g) => {
                self.gpu_present = Some(true);
                Some(g)
            }
            Err(e) => {
                if self.gpu_present.is_none() {
                    debug!("gpu probe failed, disabling gpu sampling: {e}");
                    self.gpu_present = Some(false);
                } else {
                    warn!("gpu collection failed: {e}");
                }
                None
            }
        }
    }

    fn read_cpu(&mut self) -> CpuInfo {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_cpu_frequency();
        let cpus = self.sys.cpus();
        CpuInfo {
            name: cpus
                .first()
                .map(|c| c.brand().trim().to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| "Unknown CPU".to_string()),
            usage: self.sys.global_cpu_usage(),
            temperature: hottest(&self.components, CPU_LABELS).unwrap_or(0.0),
            clock: cpus.first().map(|c| c.frequency()).unwrap_or(0),
            power: None,
            cores: cpus
                .iter()
                .enumerate()
                .map(|(index, c)| CoreLoad {
                    index,
                    usage: c.cpu_usage(),
                })
                .collect(),
        }
    }

    fn read_ram(&mut self) -> RamInfo {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        let used = total.saturating_sub(self.sys.available_memory());
        RamInfo::new(bytes_to_gb(used), bytes_to_gb(total))
    }

    fn read_storage(&mut self) -> Vec<StorageDevice> {
        self.disks.refresh(false); // don't drop missing disks
        let disk_temp = hottest(&self.components, DISK_LABELS);
        let mut seen = HashSet::new();
        self.disks
            .iter()
            .filter(|d| d.total_space() > 0)
            .filter_map(|d| {
                let name = d.name().to_string_lossy().into_owned();
                // the same device is often mounted more than once
                if !seen.insert(name.clone()) {
                    return None;
                }
                let temperature = if label_matches(&name, &["nvme"]) { disk_temp } else { None };
                Some(StorageDevice {
                    name,
                    temperature,
                    health: None,
                    smart: None,
                })
            })
            .collect()
    }

    fn read_network(&mut self) -> NetworkInfo {
        self.networks.refresh(false);
        let now = Instant::now();
        let secs = now.duration_since(self.last_net).as_secs_f64().max(0.001);
        self.last_net = now;
        // received()/transmitted() are deltas since the previous refresh
        let (rx, tx) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, d)| {
                (rx.saturating_add(d.received()), tx.saturating_add(d.transmitted()))
            });
        NetworkInfo {
            download: rx as f64 / secs,
            upload: tx as f64 / secs,
            ping: self.ping(),
            local_ip: self.cached_local_ip(),
        }
    }

    fn cached_local_ip(&mut self) -> String {
        match &self.local_ip {
            Some((at, ip)) if at.elapsed() < LOCAL_IP_TTL => ip.clone(),
            _ => {
                let ip = local_ip()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "127.0.0.1".to_string());
                self.local_ip = Some((Instant::now(), ip.clone()));
                ip
            }
        }
    }

    /// TCP connect round trip to the configured target; -1 when unknown.
    fn ping(&self) -> i64 {
        let Some(target) = self.hw.ping_target.as_deref() else {
            return PING_UNKNOWN;
        };
        let Some(addr) = target.to_socket_addrs().ok().and_then(|mut a| a.next()) else {
            return PING_UNKNOWN;
        };
        let started = Instant::now();
        match TcpStream::connect_timeout(&addr, PING_TIMEOUT) {
            Ok(_) => started.elapsed().as_millis() as i64,
            Err(_) => PING_UNKNOWN,
        }
    }

    /// Busiest process, used as the gaming foreground guess.
    fn busiest_process(&mut self) -> Option<String> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        self.sys
            .processes()
            .values()
            .max_by(|a, b| {
                a.cpu_usage()
                    .partial_cmp(&b.cpu_usage())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| p.name().to_string_lossy().into_owned())
    }
}

impl SensorSource for SystemSensors {
    fn name(&self) -> &'static str {
        "system"
    }

    fn admin_level(&self) -> AdminLevel {
        self.admin
    }

    fn sample(&mut self) -> Result<SystemSnapshot, SensorError> {
        self.components.refresh(false);

        let cpu = self.read_cpu();
        let ram = self.read_ram();
        let mut gpu = self.read_gpu().unwrap_or_else(GpuInfo::absent);
        if let Some(t) = hottest(&self.components, GPU_LABELS) {
            gpu.temperature = t;
        }
        let storage = if self.hw.storage {
            self.read_storage()
        } else {
            Vec::new()
        };
        let network = self.hw.network.then(|| self.read_network());

        let gaming = if self.gaming.enabled && gpu.usage >= self.gaming.gpu_load_threshold {
            let process = self.busiest_process();
            gaming::estimate(&gpu, process, &self.gaming)
        } else {
            gaming::estimate(&gpu, None, &self.gaming)
        };

        Ok(SystemSnapshot {
            timestamp: unix_now(),
            cpu,
            gpu,
            ram,
            storage,
            network,
            gaming,
            admin_level: self.admin,
        })
    }
}
