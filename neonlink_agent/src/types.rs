//! Data types sent to the client over WebSocket.
//! Keep this module minimal and stable: it defines the wire format.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Sensor-access tier reported with every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminLevel {
    Full,
    Limited,
    Minimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuVendor {
    #[serde(rename = "NVIDIA")]
    Nvidia,
    #[serde(rename = "AMD")]
    Amd,
    Intel,
    Unknown,
}

impl GpuVendor {
    /// Best-effort vendor guess from a marketing/model string.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_ascii_lowercase();
        if m.contains("nvidia") || m.contains("geforce") || m.contains("rtx") || m.contains("quadro") {
            GpuVendor::Nvidia
        } else if m.contains("amd") || m.contains("radeon") || m.contains("ati ") {
            GpuVendor::Amd
        } else if m.contains("intel") || m.contains("iris") || m.contains("arc ") {
            GpuVendor::Intel
        } else {
            GpuVendor::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreLoad {
    pub index: usize,
    pub usage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    pub name: String,
    pub usage: f32,
    pub temperature: f32,
    pub clock: u64,
    pub power: Option<f32>,
    pub cores: Vec<CoreLoad>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuInfo {
    pub name: String,
    pub vendor: GpuVendor,
    pub usage: f32,
    pub temperature: f32,
    // GB
    pub vram_used: f64,
    pub vram_total: f64,
    pub clock: u64,
    pub memory_clock: Option<u64>,
    pub power: Option<f32>,
    pub fan_speed: Option<f32>,
}

impl GpuInfo {
    /// Placeholder reported when no GPU could be probed.
    pub fn absent() -> Self {
        GpuInfo {
            name: "Unknown".to_string(),
            vendor: GpuVendor::Unknown,
            usage: 0.0,
            temperature: 0.0,
            vram_used: 0.0,
            vram_total: 0.0,
            clock: 0,
            memory_clock: None,
            power: None,
            fan_speed: None,
        }
    }
}

/// RAM usage in GB. Only `used` and `total` are stored; `available` and
/// `usedPercent` are computed on demand and emitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RamInfo {
    pub used: f64,
    pub total: f64,
}

impl RamInfo {
    pub fn new(used: f64, total: f64) -> Self {
        Self { used, total }
    }

    pub fn available(&self) -> f64 {
        self.total - self.used
    }

    pub fn used_percent(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        (self.used / self.total * 100.0).clamp(0.0, 100.0)
    }
}

impl Serialize for RamInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("RamInfo", 4)?;
        st.serialize_field("used", &self.used)?;
        st.serialize_field("total", &self.total)?;
        st.serialize_field("available", &self.available())?;
        st.serialize_field("usedPercent", &self.used_percent())?;
        st.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartData {
    pub total_bytes_written: u64,
    pub power_on_hours: u64,
    pub reallocated_sectors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDevice {
    pub name: String,
    pub temperature: Option<f32>,
    pub health: Option<f32>,
    pub smart: Option<SmartData>,
}

/// Ping value used when latency could not be measured.
pub const PING_UNKNOWN: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    // bytes per second, aggregated across interfaces
    pub download: f64,
    pub upload: f64,
    pub ping: i64,
    pub local_ip: String,
}

/// Heuristic gaming block. `fps`/`fps1Low` are estimates derived from GPU
/// load, not frame counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamingInfo {
    pub active: bool,
    pub fps: f32,
    #[serde(rename = "fps1Low")]
    pub fps_1_low: f32,
    pub frame_time: f32,
    pub process: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub cpu: CpuInfo,
    pub gpu: GpuInfo,
    pub ram: RamInfo,
    pub storage: Vec<StorageDevice>,
    pub network: Option<NetworkInfo>,
    pub gaming: Option<GamingInfo>,
    pub admin_level: AdminLevel,
}

pub(crate) fn clamp_pct(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}

impl SystemSnapshot {
    /// Snapshot used when nothing better is available (cold start with a
    /// failing sensor).
    pub fn degraded(timestamp: i64) -> Self {
        SystemSnapshot {
            timestamp,
            cpu: CpuInfo {
                name: "Unknown".to_string(),
                usage: 0.0,
                temperature: 0.0,
                clock: 0,
                power: None,
                cores: Vec::new(),
            },
            gpu: GpuInfo::absent(),
            ram: RamInfo::new(0.0, 0.0),
            storage: Vec::new(),
            network: None,
            gaming: None,
            admin_level: AdminLevel::Minimal,
        }
    }

    /// Force every percentage field into [0, 100].
    pub fn clamp_percentages(&mut self) {
        self.cpu.usage = clamp_pct(self.cpu.usage);
        for core in &mut self.cpu.cores {
            core.usage = clamp_pct(core.usage);
        }
        self.gpu.usage = clamp_pct(self.gpu.usage);
        if let Some(fan) = self.gpu.fan_speed.as_mut() {
            *fan = clamp_pct(*fan);
        }
        for dev in &mut self.storage {
            if let Some(h) = dev.health.as_mut() {
                *h = clamp_pct(*h);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_derived_fields() {
        let ram = RamInfo::new(8.0, 16.0);
        assert_eq!(ram.used_percent(), 50.0);
        assert_eq!(ram.available(), 8.0);

        let empty = RamInfo::new(0.0, 0.0);
        assert_eq!(empty.used_percent(), 0.0);
    }

    #[test]
    fn ram_serializes_derived_fields() {
        let v = serde_json::to_value(RamInfo::new(8.0, 16.0)).unwrap();
        assert_eq!(v["usedPercent"], 50.0);
        assert_eq!(v["available"], 8.0);

        // derived fields are ignored on the way back in
        let back: RamInfo = serde_json::from_value(v).unwrap();
        assert_eq!(back, RamInfo::new(8.0, 16.0));
    }

    #[test]
    fn clamps_percentages_and_nan() {
        let mut s = SystemSnapshot::degraded(1);
        s.cpu.usage = 140.0;
        s.cpu.cores.push(CoreLoad { index: 0, usage: -3.0 });
        s.gpu.usage = f32::NAN;
        s.gpu.fan_speed = Some(250.0);
        s.clamp_percentages();
        assert_eq!(s.cpu.usage, 100.0);
        assert_eq!(s.cpu.cores[0].usage, 0.0);
        assert_eq!(s.gpu.usage, 0.0);
        assert_eq!(s.gpu.fan_speed, Some(100.0));
    }

    #[test]
    fn wire_names_are_camel_case() {
        let mut s = SystemSnapshot::degraded(42);
        s.gaming = Some(GamingInfo {
            active: true,
            fps: 60.0,
            fps_1_low: 48.0,
            frame_time: 16.6,
            process: None,
        });
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["adminLevel"], "Minimal");
        assert_eq!(v["gpu"]["vendor"], "Unknown");
        assert!(v["gpu"].get("vramUsed").is_some());
        assert_eq!(v["gaming"]["fps1Low"], 48.0);
        assert!(v["network"].is_null());
    }

    #[test]
    fn vendor_guess() {
        assert_eq!(GpuVendor::from_model("NVIDIA GeForce RTX 4070"), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_model("AMD Radeon RX 7800"), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_model("Intel(R) UHD Graphics"), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_model("llvmpipe"), GpuVendor::Unknown);
        assert_eq!(
            serde_json::to_value(GpuVendor::Nvidia).unwrap(),
            serde_json::json!("NVIDIA")
        );
    }
}
